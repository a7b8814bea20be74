//! Transport for the relay link: plain TCP or TLS over TCP.
use async_trait::async_trait;
use log::debug;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::config::RelayConfig;

/// Byte stream the IRC codec runs over.
pub trait LinkIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkIo for T {}

pub type LinkStream = Box<dyn LinkIo>;

/// Opens a fresh connection to the chat network. Called once at start-up and
/// again for every reconnect.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> io::Result<LinkStream>;

    fn describe(&self) -> String;
}

pub struct NetworkDialer {
    host: String,
    port: u16,
    tls: Option<TlsConnector>,
}

impl NetworkDialer {
    pub fn from_config(config: &RelayConfig) -> io::Result<Self> {
        let tls = if config.use_tls {
            Some(tls_connector()?)
        } else {
            None
        };
        Ok(Self {
            host: config.server.clone(),
            port: config.port,
            tls,
        })
    }
}

fn tls_connector() -> io::Result<TlsConnector> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[async_trait]
impl Dialer for NetworkDialer {
    async fn dial(&self) -> io::Result<LinkStream> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;
        match &self.tls {
            None => Ok(Box::new(tcp)),
            Some(connector) => {
                let name = ServerName::try_from(self.host.clone())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let stream = connector.connect(name, tcp).await?;
                debug!("TLS established with {}", self.host);
                Ok(Box::new(stream))
            }
        }
    }

    fn describe(&self) -> String {
        let scheme = if self.tls.is_some() { "ircs" } else { "irc" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}
