//! # Relay Module - IRC Bridge
//!
//! One outbound IRC connection per process, shared by every session through
//! an `Arc<RelayBridge>`.
//!
//! ```text
//!             ┌─────────── link task ───────────┐
//! IRC server ─┤ PING/PONG, KICK rejoin, PRIVMSG ├─► EventQueue (drop-oldest)
//!             └───────────────▲─────────────────┘        │
//!                             │ outbound mpsc            ▼ logger task
//!   session "<alice> hi" ─────┘                    RelayFeed ─► irc_YYYY-MM-DD.txt
//!                                                        └────► broadcast ─► sessions
//! ```
//!
//! The network reader never waits on disk: events go into a bounded queue
//! that sheds its oldest entry when full. A single logger task drains the
//! queue, appends each event to the day's segment and then fans it out to
//! sessions in relay mode. Appending and fanning out happen under the same
//! gate as a session's replay-and-subscribe, so a session sees every event
//! exactly once: either in its replay or live.

pub mod link;
pub mod protocol;
pub mod queue;
pub mod segment;

use chrono::{DateTime, Local};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::logutil::escape_log;
use crate::metrics;

pub use link::{Dialer, LinkStream, NetworkDialer};
pub use protocol::{IrcCodec, IrcMessage};
pub use queue::{EventQueue, PushOutcome};
pub use segment::SegmentLog;

/// Smallest live fan-out buffer. The bridge sizes it to at least the inbound
/// queue capacity; a session that falls further behind is told how many
/// events it skipped and can reread them from the log.
const LIVE_BUFFER: usize = 256;

/// Nick collisions tolerated during registration before giving up.
const MAX_NICK_RETRIES: usize = 5;

type IrcLink = Framed<LinkStream, IrcCodec>;

/// One chat message seen on the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    pub timestamp: DateTime<Local>,
    pub channel: String,
    pub nick: String,
    pub body: String,
}

impl RelayEvent {
    pub fn new(channel: &str, nick: &str, body: &str) -> Self {
        Self {
            timestamp: Local::now(),
            channel: channel.to_string(),
            nick: nick.to_string(),
            body: body.to_string(),
        }
    }

    /// `YYYY-MM-DD HH:MM:SS <#channel> nick: body`
    pub fn log_line(&self) -> String {
        format!(
            "{} <{}> {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.channel,
            self.nick,
            self.body
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no response from the IRC server within {0:?}")]
    Timeout(Duration),

    #[error("IRC server refused the connection: {0}")]
    Rejected(String),

    #[error("IRC server closed the connection during registration")]
    ClosedDuringRegistration,

    #[error("relay is not connected")]
    NotConnected,

    #[error("relay has shut down")]
    Closed,
}

/// Segment log plus live fan-out, serialized by one gate.
pub struct RelayFeed {
    gate: tokio::sync::Mutex<SegmentLog>,
    live: Mutex<Option<broadcast::Sender<RelayEvent>>>,
}

impl RelayFeed {
    pub fn new(segments: SegmentLog) -> Self {
        Self::with_live_buffer(segments, LIVE_BUFFER)
    }

    /// Each subscriber may trail the newest event by at most `capacity`.
    pub fn with_live_buffer(segments: SegmentLog, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            gate: tokio::sync::Mutex::new(segments),
            live: Mutex::new(Some(tx)),
        }
    }

    fn sender(&self) -> Option<broadcast::Sender<RelayEvent>> {
        self.live
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .cloned()
    }

    /// Append to the day's segment, then deliver to live subscribers. The
    /// event is delivered even when the disk write fails.
    pub async fn publish(&self, event: RelayEvent) -> io::Result<()> {
        let mut segments = self.gate.lock().await;
        let written = segments.append(&event);
        if let Some(tx) = self.sender() {
            // No receivers is not an error
            let _ = tx.send(event);
        }
        written
    }

    /// Last `n` lines of today's segment together with a subscription that
    /// starts right after them.
    pub async fn replay_and_subscribe(
        &self,
        n: usize,
    ) -> Result<(Vec<String>, broadcast::Receiver<RelayEvent>), RelayError> {
        let segments = self.gate.lock().await;
        let receiver = self.sender().ok_or(RelayError::Closed)?.subscribe();
        let lines = segments.recent(Local::now().date_naive(), n)?;
        Ok((lines, receiver))
    }

    pub async fn recent(&self, n: usize) -> io::Result<Vec<String>> {
        self.gate.lock().await.recent(Local::now().date_naive(), n)
    }

    /// Drop the fan-out sender (subscribers observe `Closed`) and close the
    /// open segment.
    pub async fn close(&self) -> io::Result<()> {
        let mut segments = self.gate.lock().await;
        self.live.lock().unwrap_or_else(|p| p.into_inner()).take();
        segments.close()
    }
}

#[derive(Debug)]
struct LinkState {
    connected: AtomicBool,
    nick: Mutex<String>,
}

impl LinkState {
    fn set_connected(&self, nick: Option<&str>) {
        if let Some(nick) = nick {
            *self.nick.lock().unwrap_or_else(|p| p.into_inner()) = nick.to_string();
        }
        self.connected.store(nick.is_some(), Ordering::SeqCst);
    }
}

pub struct RelayBridge {
    config: RelayConfig,
    queue: Arc<EventQueue<RelayEvent>>,
    feed: Arc<RelayFeed>,
    outbound: mpsc::UnboundedSender<IrcMessage>,
    state: Arc<LinkState>,
    shutdown: CancellationToken,
    link_task: Mutex<Option<JoinHandle<()>>>,
    logger_task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayBridge {
    /// Connect to the configured network and start the relay tasks. Returns
    /// once the server has accepted registration and every channel has been
    /// joined, or with the reason it could not.
    pub async fn connect(config: RelayConfig) -> Result<Arc<Self>, RelayError> {
        let dialer = NetworkDialer::from_config(&config)?;
        Self::connect_with(config, Arc::new(dialer)).await
    }

    pub async fn connect_with(
        config: RelayConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Arc<Self>, RelayError> {
        let segments = SegmentLog::new(&config.log_dir)?;
        info!("Connecting relay to {}", dialer.describe());
        let (link, nick) = establish(dialer.as_ref(), &config).await?;

        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        let feed = Arc::new(RelayFeed::with_live_buffer(
            segments,
            config.queue_capacity.max(LIVE_BUFFER),
        ));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(LinkState {
            connected: AtomicBool::new(false),
            nick: Mutex::new(String::new()),
        });
        state.set_connected(Some(&nick));
        let shutdown = CancellationToken::new();

        let logger_task = tokio::spawn(run_logger(Arc::clone(&queue), Arc::clone(&feed)));
        let worker = LinkWorker {
            config: config.clone(),
            dialer,
            queue: Arc::clone(&queue),
            state: Arc::clone(&state),
            outbound: outbound_rx,
            rejoin: outbound.clone(),
            shutdown: shutdown.clone(),
        };
        let link_task = tokio::spawn(worker.run(link, nick));

        Ok(Arc::new(Self {
            config,
            queue,
            feed,
            outbound,
            state,
            shutdown,
            link_task: Mutex::new(Some(link_task)),
            logger_task: Mutex::new(Some(logger_task)),
        }))
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Nick currently registered with the server.
    pub fn nick(&self) -> String {
        self.state
            .nick
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn channels(&self) -> Vec<String> {
        self.config.channels.iter().map(|c| c.name.clone()).collect()
    }

    pub fn replay_lines(&self) -> usize {
        self.config.replay_lines
    }

    pub fn queue(&self) -> &EventQueue<RelayEvent> {
        &self.queue
    }

    /// Send `<sender> text` to one channel.
    pub fn send_message(&self, channel: &str, sender: &str, text: &str) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        let line = format!("<{}> {}", sender, text);
        self.outbound
            .send(IrcMessage::privmsg(channel, &line))
            .map_err(|_| RelayError::Closed)?;
        metrics::inc_relay_sent();
        Ok(())
    }

    /// Send `<sender> text` to every configured channel.
    pub fn broadcast(&self, sender: &str, text: &str) -> Result<(), RelayError> {
        for channel in &self.config.channels {
            self.send_message(&channel.name, sender, text)?;
        }
        Ok(())
    }

    /// Last `n` lines of today's relay log.
    pub async fn recent_messages(&self, n: usize) -> Result<Vec<String>, RelayError> {
        Ok(self.feed.recent(n).await?)
    }

    pub async fn replay_and_subscribe(
        &self,
        n: usize,
    ) -> Result<(Vec<String>, broadcast::Receiver<RelayEvent>), RelayError> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::Closed);
        }
        self.feed.replay_and_subscribe(n).await
    }

    /// Quit the server, drain pending events into the log and close it.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.state.connected.store(false, Ordering::SeqCst);

        let link = self.link_task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = link {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("Relay link did not stop within 5s");
            }
        }

        self.queue.close();
        let logger = self.logger_task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = logger {
            if let Err(e) = handle.await {
                error!("Relay logger task failed: {}", e);
            }
        }

        if let Err(e) = self.feed.close().await {
            error!("Failed to close relay log: {}", e);
        }
        info!(
            "Relay shut down ({} events dropped on overflow)",
            self.queue.dropped()
        );
    }
}

/// Dial, register and join every channel within the connect timeout.
async fn establish(dialer: &dyn Dialer, config: &RelayConfig) -> Result<(IrcLink, String), RelayError> {
    let limit = Duration::from_secs(config.connect_timeout_secs.max(1));
    tokio::time::timeout(limit, register(dialer, config))
        .await
        .map_err(|_| RelayError::Timeout(limit))?
}

async fn register(dialer: &dyn Dialer, config: &RelayConfig) -> Result<(IrcLink, String), RelayError> {
    let stream = dialer.dial().await?;
    let mut link = Framed::new(stream, IrcCodec::new());
    let mut nick = config.nick.clone();
    let mut retries = 0;
    // Channels still waiting for our JOIN echo or a refusal; None until welcomed.
    let mut awaiting: Option<Vec<String>> = None;
    let mut joined = 0;
    let mut refused = Vec::new();

    link.send(IrcMessage::nick(&nick)).await?;
    link.send(IrcMessage::user(&config.nick, &config.realname)).await?;

    while let Some(msg) = link.next().await {
        let msg = msg?;
        match msg.command.as_str() {
            "PING" => {
                link.send(IrcMessage::pong(msg.param(0).unwrap_or_default()))
                    .await?;
            }
            // ERR_NICKNAMEINUSE
            "433" if awaiting.is_none() => {
                retries += 1;
                if retries > MAX_NICK_RETRIES {
                    return Err(RelayError::Rejected(format!(
                        "nickname {} and {} alternatives in use",
                        config.nick, MAX_NICK_RETRIES
                    )));
                }
                nick.push('_');
                warn!("Relay nick in use, trying {}", nick);
                link.send(IrcMessage::nick(&nick)).await?;
            }
            "ERROR" => {
                let reason = msg.params.last().cloned().unwrap_or_default();
                return Err(RelayError::Rejected(reason));
            }
            // RPL_WELCOME
            "001" if awaiting.is_none() => {
                if let Some(assigned) = msg.param(0).filter(|n| !n.is_empty() && *n != "*") {
                    nick = assigned.to_string();
                }
                for channel in &config.channels {
                    link.send(IrcMessage::join(&channel.name, channel.password.as_deref()))
                        .await?;
                }
                awaiting = Some(
                    config
                        .channels
                        .iter()
                        .map(|c| c.name.to_ascii_lowercase())
                        .collect(),
                );
            }
            "JOIN" => {
                let ours = msg.source_nick().is_some_and(|n| n.eq_ignore_ascii_case(&nick));
                if let (true, Some(pending), Some(channel)) = (ours, awaiting.as_mut(), msg.param(0)) {
                    let channel = channel.to_ascii_lowercase();
                    if let Some(pos) = pending.iter().position(|c| *c == channel) {
                        pending.remove(pos);
                        joined += 1;
                    }
                }
            }
            code if is_join_refusal(code) => {
                if let (Some(pending), Some(channel)) = (awaiting.as_mut(), msg.param(1)) {
                    let reason = msg.params.last().cloned().unwrap_or_default();
                    warn!(
                        "Relay could not join {}: {} {}",
                        escape_log(channel),
                        code,
                        escape_log(&reason)
                    );
                    let channel = channel.to_ascii_lowercase();
                    pending.retain(|c| *c != channel);
                    refused.push(format!("{} ({} {})", channel, code, reason));
                }
            }
            other => trace!("Relay registration: ignoring {}", other),
        }

        if awaiting.as_ref().is_some_and(|pending| pending.is_empty()) {
            if joined == 0 && !config.channels.is_empty() {
                return Err(RelayError::Rejected(format!(
                    "could not join any channel: {}",
                    refused.join("; ")
                )));
            }
            info!(
                "Relay registered as {} and joined {} of {} channel(s)",
                nick,
                joined,
                config.channels.len()
            );
            return Ok((link, nick));
        }
    }
    Err(RelayError::ClosedDuringRegistration)
}

/// Numerics a server sends when it refuses a JOIN.
fn is_join_refusal(code: &str) -> bool {
    matches!(
        code,
        // NOSUCHCHANNEL, TOOMANYCHANNELS, CHANNELISFULL, INVITEONLYCHAN,
        // BANNEDFROMCHAN, BADCHANNELKEY, BADCHANMASK, NEEDREGGEDNICK
        "403" | "405" | "471" | "473" | "474" | "475" | "476" | "477"
    )
}

async fn run_logger(queue: Arc<EventQueue<RelayEvent>>, feed: Arc<RelayFeed>) {
    while let Some(event) = queue.pop().await {
        match feed.publish(event).await {
            Ok(()) => metrics::inc_relay_logged(),
            Err(e) => error!("Failed to write relay log: {}", e),
        }
    }
    debug!("Relay logger drained");
}

enum LinkEnd {
    Shutdown,
    Lost(String),
}

struct LinkWorker {
    config: RelayConfig,
    dialer: Arc<dyn Dialer>,
    queue: Arc<EventQueue<RelayEvent>>,
    state: Arc<LinkState>,
    outbound: mpsc::UnboundedReceiver<IrcMessage>,
    rejoin: mpsc::UnboundedSender<IrcMessage>,
    shutdown: CancellationToken,
}

impl LinkWorker {
    async fn run(mut self, mut link: IrcLink, mut nick: String) {
        loop {
            match self.serve(&mut link, &nick).await {
                LinkEnd::Shutdown => return,
                LinkEnd::Lost(reason) => {
                    self.state.set_connected(None);
                    warn!("Relay link lost: {}", reason);
                }
            }

            let delay = Duration::from_secs(self.config.reconnect_delay_secs);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                // Anything queued against the old connection is stale.
                while self.outbound.try_recv().is_ok() {}

                let attempt = tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    r = establish(self.dialer.as_ref(), &self.config) => r,
                };
                match attempt {
                    Ok((new_link, new_nick)) => {
                        link = new_link;
                        nick = new_nick;
                        self.state.set_connected(Some(&nick));
                        info!("Relay reconnected to {}", self.dialer.describe());
                        break;
                    }
                    Err(e) => warn!("Relay reconnect failed: {}; retrying in {:?}", e, delay),
                }
            }
        }
    }

    async fn serve(&mut self, link: &mut IrcLink, nick: &str) -> LinkEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = link.send(IrcMessage::quit("BBS shutting down")).await;
                    return LinkEnd::Shutdown;
                }
                out = self.outbound.recv() => match out {
                    Some(msg) => {
                        if let Err(e) = link.send(msg).await {
                            return LinkEnd::Lost(e.to_string());
                        }
                    }
                    None => return LinkEnd::Shutdown,
                },
                inbound = link.next() => match inbound {
                    Some(Ok(msg)) => match self.handle_inbound(nick, msg) {
                        Ok(Some(reply)) => {
                            if let Err(e) = link.send(reply).await {
                                return LinkEnd::Lost(e.to_string());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => return LinkEnd::Lost(e.to_string()),
                    },
                    Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                    None => return LinkEnd::Lost("server closed the connection".to_string()),
                },
            }
        }
    }

    /// React to one server message; returns the reply to send, if any.
    fn handle_inbound(&self, nick: &str, msg: IrcMessage) -> io::Result<Option<IrcMessage>> {
        match msg.command.as_str() {
            "PING" => {
                return Ok(Some(IrcMessage::pong(msg.param(0).unwrap_or_default())));
            }
            "PRIVMSG" => {
                let (Some(target), Some(text)) = (msg.param(0), msg.param(1)) else {
                    return Ok(None);
                };
                let from = msg.source_nick().unwrap_or("unknown");
                metrics::inc_relay_received();
                if self.queue.push(RelayEvent::new(target, from, text)) == PushOutcome::DroppedOldest {
                    metrics::inc_relay_dropped();
                    warn!(
                        "Relay queue full; dropped oldest event ({} dropped so far)",
                        self.queue.dropped()
                    );
                }
            }
            "KICK" => {
                let (Some(channel), Some(kicked)) = (msg.param(0), msg.param(1)) else {
                    return Ok(None);
                };
                if kicked.eq_ignore_ascii_case(nick) {
                    self.schedule_rejoin(channel);
                }
            }
            code if is_join_refusal(code) => {
                let channel = msg.param(1).unwrap_or("?");
                let reason = msg.params.last().map(String::as_str).unwrap_or_default();
                warn!(
                    "Relay could not rejoin {}: {} {}",
                    escape_log(channel),
                    code,
                    escape_log(reason)
                );
            }
            "ERROR" => {
                let reason = msg.params.last().cloned().unwrap_or_default();
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    escape_log(&reason),
                ));
            }
            other => trace!("Relay: ignoring {}", other),
        }
        Ok(None)
    }

    // TODO: cap repeated rejoins after consecutive kicks from the same channel.
    fn schedule_rejoin(&self, channel: &str) {
        let delay = Duration::from_secs(self.config.rejoin_delay_secs);
        let key = self
            .config
            .channels
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(channel))
            .and_then(|c| c.password.clone());
        let join = IrcMessage::join(channel, key.as_deref());
        let tx = self.rejoin.clone();
        let shutdown = self.shutdown.clone();
        warn!("Kicked from {}, rejoining in {:?}", escape_log(channel), delay);
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(join);
                }
            }
        });
    }
}
