//! Test utilities & fixtures shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};

use relaybbs::bbs::{BbsContext, BbsServer, Session};
use relaybbs::config::{Config, RelayChannel, RelayConfig};
use relaybbs::relay::{Dialer, LinkStream, RelayBridge};
use relaybbs::storage::{MessageBoard, UserStore};
use relaybbs::transport::LineTransport;

pub const WAIT: Duration = Duration::from_secs(5);

/// Argon2 parameters cheap enough for tests.
pub fn cheap_params() -> Option<argon2::Params> {
    argon2::Params::new(1024, 1, 1, None).ok()
}

pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.bbs.name = "Test BBS".into();
    config.bbs.welcome_screen = dir.join("welcome.txt").to_string_lossy().into_owned();
    config.storage.data_dir = dir.join("data").to_string_lossy().into_owned();
    config.relay.log_dir = dir.join("logs").to_string_lossy().into_owned();
    config
}

/// Shared BBS state over an in-memory user table and a temp-dir board.
pub async fn context(dir: &Path, relay: Option<Arc<RelayBridge>>) -> Arc<BbsContext> {
    let config = test_config(dir);
    let users = UserStore::open_in_memory(cheap_params()).unwrap();
    let board = MessageBoard::open(config.storage.message_board_path())
        .await
        .unwrap();
    BbsServer::from_parts(config, users, board, relay).context()
}

/// Scripted client for a session running over the line transport.
pub struct Client {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    seen: String,
    pub task: JoinHandle<io::Result<()>>,
}

impl Client {
    pub fn connect(ctx: Arc<BbsContext>) -> Self {
        let (client, server) = duplex(64 * 1024);
        let (sr, sw) = tokio::io::split(server);
        let task = tokio::spawn(Session::new(ctx, LineTransport::new(sr, sw), "test").run());
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader,
            writer,
            seen: String::new(),
            task,
        }
    }

    /// Read until `needle` appears; returns everything up to and including it.
    pub async fn expect(&mut self, needle: &str) -> String {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(pos) = self.seen.find(needle) {
                let end = pos + needle.len();
                let head: String = self.seen.drain(..end).collect();
                return head;
            }
            let mut buf = [0u8; 4096];
            let n = tokio::time::timeout_at(deadline, self.reader.read(&mut buf))
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}; got {:?}", self.seen))
                .unwrap();
            assert!(n > 0, "stream closed waiting for {needle:?}; got {:?}", self.seen);
            self.seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Close our side and wait for the session to finish.
    pub async fn hang_up(mut self) -> io::Result<()> {
        self.writer.shutdown().await.unwrap();
        drop(self.writer);
        tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap()
    }

    /// Wait for the session to end on its own, returning what it wrote last.
    pub async fn finish(mut self) -> (String, io::Result<()>) {
        let mut rest = Vec::new();
        tokio::time::timeout(WAIT, self.reader.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        self.seen.push_str(&String::from_utf8_lossy(&rest));
        let result = tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap();
        (self.seen, result)
    }
}

/// Register and log in, leaving the client at the main menu prompt.
pub async fn register(client: &mut Client, username: &str, password: &str) {
    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("r").await;
    client.expect("Choose a username: ").await;
    client.send(username).await;
    client.expect("Choose a password: ").await;
    client.send(password).await;
    client.expect("Registration successful!").await;
    client.expect("Choice: ").await;
}

/// Dialer handing the test the server end of an in-memory connection.
pub struct DuplexDialer {
    servers: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Dialer for DuplexDialer {
    async fn dial(&self) -> io::Result<LinkStream> {
        let (ours, theirs) = duplex(64 * 1024);
        self.servers
            .send(theirs)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no test server"))?;
        Ok(Box::new(ours))
    }

    fn describe(&self) -> String {
        "irc://duplex".into()
    }
}

/// Accepts dials made through a [`DuplexDialer`].
pub struct FakeNetwork {
    incoming: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
}

impl FakeNetwork {
    pub fn new() -> (Arc<dyn Dialer>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(DuplexDialer { servers: tx }),
            Self {
                incoming: Mutex::new(rx),
            },
        )
    }

    pub async fn accept(&self) -> FakeIrc {
        let stream = tokio::time::timeout(WAIT, self.incoming.lock().await.recv())
            .await
            .expect("no connection attempt")
            .expect("dialer dropped");
        FakeIrc {
            lines: Framed::new(stream, LinesCodec::new()),
        }
    }
}

/// Server side of one relay connection, driven line by line.
pub struct FakeIrc {
    lines: Framed<DuplexStream, LinesCodec>,
}

impl FakeIrc {
    pub async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.lines.next())
            .await
            .expect("timed out waiting for the relay")
            .map(|l| l.unwrap().trim_end_matches('\r').to_string())
    }

    /// Skip lines until one starts with `prefix`.
    pub async fn expect(&mut self, prefix: &str) -> String {
        loop {
            let line = self
                .recv()
                .await
                .unwrap_or_else(|| panic!("connection closed waiting for {prefix:?}"));
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.lines.send(format!("{line}\r")).await.unwrap();
    }

    /// Answer NICK/USER with a welcome and confirm each JOIN.
    pub async fn welcome(&mut self, nick: &str, joins: usize) {
        self.expect("NICK ").await;
        self.expect("USER ").await;
        self.send(&format!(":irc.test 001 {nick} :Welcome to the test network"))
            .await;
        for _ in 0..joins {
            let join = self.expect("JOIN ").await;
            self.confirm_join(nick, &join).await;
        }
    }

    /// Echo a JOIN line back the way a server confirms it.
    pub async fn confirm_join(&mut self, nick: &str, join: &str) {
        let channel = join.split_whitespace().nth(1).expect("JOIN without channel");
        self.send(&format!(":{nick}!relay@test JOIN {channel}")).await;
    }
}

pub fn relay_config(log_dir: &Path) -> RelayConfig {
    RelayConfig {
        enabled: true,
        server: "irc.test".into(),
        nick: "bbsbot".into(),
        realname: "Relay BBS".into(),
        channels: vec![RelayChannel {
            name: "#bbs".into(),
            password: None,
        }],
        log_dir: log_dir.to_string_lossy().into_owned(),
        connect_timeout_secs: 5,
        rejoin_delay_secs: 0,
        reconnect_delay_secs: 0,
        ..Default::default()
    }
}

/// Connect a bridge through a fake network and complete registration.
pub async fn connected_bridge(log_dir: &Path) -> (Arc<RelayBridge>, FakeNetwork, FakeIrc) {
    let (dialer, network) = FakeNetwork::new();
    let config = relay_config(log_dir);
    let joins = config.channels.len();
    let connecting = tokio::spawn(RelayBridge::connect_with(config, dialer));
    let mut server = network.accept().await;
    server.welcome("bbsbot", joins).await;
    let bridge = tokio::time::timeout(WAIT, connecting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    (bridge, network, server)
}

/// Poll until `check` passes or the wait expires.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within {WAIT:?}");
}
