//! SSH transport: a terminal session per shell channel, no client auth.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use russh::server::{self, Auth, Msg, Session as SshSession};
use russh::{Channel, ChannelId, MethodSet, Pty};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use super::terminal::TerminalTransport;
use crate::bbs::server::sec_log;
use crate::bbs::{BbsContext, Session};
use crate::config::SshConfig;

/// Build the russh server configuration, loading or generating the host key.
pub fn server_config(cfg: &SshConfig) -> Result<Arc<server::Config>> {
    let key = match cfg.host_key.as_deref() {
        Some(path) if Path::new(path).exists() => russh_keys::load_secret_key(path, None)
            .with_context(|| format!("loading SSH host key {}", path))?,
        other => {
            if let Some(path) = other {
                warn!("SSH host key {} not found; using an ephemeral key", path);
            } else {
                warn!("No SSH host key configured; using an ephemeral key");
            }
            russh_keys::key::KeyPair::generate_ed25519()
                .ok_or_else(|| anyhow!("failed to generate an Ed25519 host key"))?
        }
    };

    let inactivity = (cfg.inactivity_timeout_secs > 0)
        .then(|| Duration::from_secs(cfg.inactivity_timeout_secs));
    Ok(Arc::new(server::Config {
        inactivity_timeout: inactivity,
        auth_rejection_time: Duration::from_secs(1),
        methods: MethodSet::NONE,
        keys: vec![key],
        ..Default::default()
    }))
}

/// Per-connection russh handler.
struct SshHandler {
    ctx: Arc<BbsContext>,
    peer: SocketAddr,
    user: String,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl SshHandler {
    fn new(ctx: Arc<BbsContext>, peer: SocketAddr) -> Self {
        Self {
            ctx,
            peer,
            user: String::new(),
            channels: HashMap::new(),
        }
    }
}

#[async_trait]
impl server::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        // BBS accounts are checked inside the session, not by SSH.
        self.user = user.to_string();
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut SshSession,
    ) -> Result<bool, Self::Error> {
        debug!("SSH {}: session channel {:?} opened", self.peer, channel.id());
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        debug!(
            "SSH {}: pty {} {}x{}",
            self.peer, term, col_width, row_height
        );
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        let Some(open) = self.channels.remove(&channel) else {
            let _ = session.channel_failure(channel);
            return Ok(());
        };
        let _ = session.channel_success(channel);

        let handle = session.handle();
        let ctx = Arc::clone(&self.ctx);
        let peer = format!("ssh:{}@{}", self.user, self.peer);
        info!("SSH shell for {}", peer);
        tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(open.into_stream());
            let terminal = TerminalTransport::new(reader, writer);
            if let Err(e) = Session::new(ctx, terminal, peer.clone()).run().await {
                debug!("SSH session {} ended: {}", peer, e);
            }
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });
        Ok(())
    }
}

/// Accept loop for the SSH transport.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<BbsContext>,
    config: Arc<server::Config>,
) -> Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("SSH accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let handler = SshHandler::new(Arc::clone(&ctx), peer);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            match server::run_stream(config, socket, handler).await {
                Ok(running) => {
                    if let Err(e) = running.await {
                        debug!("SSH connection {} closed: {}", peer, e);
                    }
                }
                Err(e) => {
                    sec_log!("SSH handshake with {} failed: {}", peer, e);
                }
            }
        });
    }
}
