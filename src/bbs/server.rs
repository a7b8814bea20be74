use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::metrics;
use crate::relay::RelayBridge;
use crate::storage::{MessageBoard, UserStore};
use crate::transport;

// Security log helper. Records go to the main log and, when configured, to
// the dedicated security log file.
macro_rules! sec_log {
    ($($arg:tt)*) => { log::warn!(target: "security", $($arg)*); };
}
pub(crate) use sec_log;

/// Shared state handed to every session and supervisor.
pub struct BbsContext {
    pub config: Config,
    pub users: UserStore,
    pub board: MessageBoard,
    /// Present only when the relay was enabled and connected at start-up.
    pub relay: Option<Arc<RelayBridge>>,
}

/// # BBS Server - Core Application Controller
///
/// Owns the stores and the relay bridge, starts one listener supervisor per
/// enabled transport and coordinates shutdown.
///
/// ## Lifecycle
///
/// 1. [`BbsServer::new`] opens the user database and message board, then
///    connects the relay when enabled. A relay that fails to connect is
///    logged and left out; the BBS runs without it.
/// 2. [`BbsServer::run`] binds every enabled listener (a bind failure aborts
///    start-up), spawns the supervisors and waits for Ctrl-C or SIGTERM.
/// 3. [`BbsServer::shutdown`] quits the relay, flushes its log and reports
///    the counters.
///
/// ## Usage
///
/// ```rust,no_run
/// use relaybbs::bbs::BbsServer;
/// use relaybbs::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::load("config.toml").await?;
///     let server = BbsServer::new(config).await?;
///     server.run().await
/// }
/// ```
pub struct BbsServer {
    ctx: Arc<BbsContext>,
}

impl BbsServer {
    pub async fn new(config: Config) -> Result<Self> {
        let params = config.security.argon2_params()?;
        let db_path = config.storage.user_db_path();
        let users = UserStore::open(&db_path, params)
            .with_context(|| format!("opening user database {}", db_path.display()))?;
        let board_path = config.storage.message_board_path();
        let board = MessageBoard::open(&board_path)
            .await
            .with_context(|| format!("opening message board {}", board_path.display()))?;

        let relay = if config.relay.enabled {
            match RelayBridge::connect(config.relay.clone()).await {
                Ok(bridge) => Some(bridge),
                Err(e) => {
                    error!("IRC relay unavailable, continuing without it: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::from_parts(config, users, board, relay))
    }

    /// Assemble a server from already-open parts.
    pub fn from_parts(
        config: Config,
        users: UserStore,
        board: MessageBoard,
        relay: Option<Arc<RelayBridge>>,
    ) -> Self {
        Self {
            ctx: Arc::new(BbsContext {
                config,
                users,
                board,
                relay,
            }),
        }
    }

    pub fn context(&self) -> Arc<BbsContext> {
        Arc::clone(&self.ctx)
    }

    /// Serve every enabled transport until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let config = &self.ctx.config;
        let mut supervisors = JoinSet::new();

        if config.telnet.enabled {
            let listener = bind(&config.telnet.bind, config.telnet.port).await?;
            info!("Telnet listening on {}:{}", config.telnet.bind, config.telnet.port);
            supervisors.spawn(transport::line::serve(listener, self.context()));
        }
        if config.ssh.enabled {
            let ssh_config = transport::ssh::server_config(&config.ssh)?;
            let listener = bind(&config.ssh.bind, config.ssh.port).await?;
            info!("SSH listening on {}:{}", config.ssh.bind, config.ssh.port);
            supervisors.spawn(transport::ssh::serve(listener, self.context(), ssh_config));
        }
        if config.web.enabled {
            let listener = bind(&config.web.bind, config.web.port).await?;
            info!("HTTP listening on {}:{}", config.web.bind, config.web.port);
            supervisors.spawn(transport::web::serve(listener, self.context()));
        }
        if supervisors.is_empty() {
            warn!("No transports enabled; waiting for shutdown signal");
        }

        tokio::select! {
            _ = shutdown_signal() => info!("Shutdown signal received"),
            Some(finished) = supervisors.join_next() => match finished {
                Ok(Ok(())) => warn!("A transport supervisor stopped unexpectedly"),
                Ok(Err(e)) => error!("Transport supervisor failed: {:#}", e),
                Err(e) => error!("Transport supervisor panicked: {}", e),
            },
        }

        supervisors.abort_all();
        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(relay) = &self.ctx.relay {
            relay.shutdown().await;
        }
        info!("Shutdown complete: {}", metrics::snapshot());
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("binding {}:{}", host, port))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
