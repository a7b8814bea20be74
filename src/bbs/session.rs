use log::{debug, error, info, warn};
use std::io;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::io::LineIo;
use super::server::{sec_log, BbsContext};
use super::welcome;
use crate::logutil::escape_log;
use crate::metrics;
use crate::relay::RelayBridge;
use crate::storage::{PostError, RegisterError};

const GREEN: &str = "\x1b[0;32m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const RED: &str = "\x1b[0;31m";
const YELLOW: &str = "\x1b[0;33m";
const CYAN: &str = "\x1b[0;36m";
const RESET: &str = "\x1b[0m";

/// Shown for every failed login, whatever the cause.
pub const LOGIN_FAILED: &str = "Login failed: invalid username or password";

/// # Session State Machine
///
/// ```text
/// Welcome → AwaitingChoice ─┬─ Authenticating ─┬─► MainMenu ─┬─ ReadMessages ─┐
///               ▲           └─ Registering ────┘      ▲      ├─ PostMessage ──┤
///               └──────────── failure ─────────┘      │      └─ RelayMode ────┘
///                                                     └───────────────────────┘
/// any state ── logout / end of stream / I/O error ──► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Welcome,
    AwaitingChoice,
    Authenticating,
    Registering,
    MainMenu,
    ReadMessages,
    PostMessage,
    RelayMode,
    Terminated,
}

/// One connected user, independent of the transport carrying it.
///
/// The session owns its transport and shares the stores and relay through
/// [`BbsContext`]. It runs to completion on its own task; an error here ends
/// only this session.
pub struct Session<T: LineIo> {
    pub id: String,
    pub peer: String,
    pub username: Option<String>,
    pub state: SessionState,
    io: T,
    ctx: Arc<BbsContext>,
}

impl<T: LineIo> Session<T> {
    pub fn new(ctx: Arc<BbsContext>, io: T, peer: impl Into<String>) -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self {
            id,
            peer: peer.into(),
            username: None,
            state: SessionState::Welcome,
            io,
            ctx,
        }
    }

    /// Drive the session until it terminates. The farewell is always
    /// attempted, even after a transport error.
    pub async fn run(mut self) -> io::Result<()> {
        metrics::session_opened();
        info!("Session {} opened from {}", self.id, self.peer);

        let result = self.drive().await;

        let farewell = format!("{}{}{}\n", YELLOW, self.ctx.config.bbs.farewell, RESET);
        if let Err(e) = self.io.write_text(&farewell).await {
            debug!("Session {}: farewell not delivered: {}", self.id, e);
        }
        metrics::session_closed();

        match &result {
            Ok(()) => info!(
                "Session {} closed (user: {})",
                self.id,
                self.username.as_deref().map(escape_log).unwrap_or_else(|| "-".into())
            ),
            Err(e) => info!("Session {} ended by transport error: {}", self.id, e),
        }
        result
    }

    async fn drive(&mut self) -> io::Result<()> {
        loop {
            let next = match self.state {
                SessionState::Welcome => self.welcome().await?,
                SessionState::AwaitingChoice => self.await_choice().await?,
                SessionState::Authenticating => self.authenticate().await?,
                SessionState::Registering => self.register().await?,
                SessionState::MainMenu => self.main_menu().await?,
                SessionState::ReadMessages => self.read_messages().await?,
                SessionState::PostMessage => self.post_message().await?,
                SessionState::RelayMode => self.relay_mode().await?,
                SessionState::Terminated => return Ok(()),
            };
            if next != self.state {
                debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
            }
            self.state = next;
        }
    }

    async fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.io.set_prompt(prompt);
        self.io.read_line().await
    }

    async fn ask_masked(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.io.set_prompt(prompt);
        self.io.read_masked().await
    }

    async fn error_line(&mut self, text: &str) -> io::Result<()> {
        self.io.write_text(&format!("{}{}{}\n", RED, text, RESET)).await
    }

    async fn welcome(&mut self) -> io::Result<SessionState> {
        let bbs = &self.ctx.config.bbs;
        let banner = welcome::load_banner(&bbs.welcome_screen, &bbs.name).await;
        self.io.write_text(&banner).await?;
        Ok(SessionState::AwaitingChoice)
    }

    async fn await_choice(&mut self) -> io::Result<SessionState> {
        let prompt = format!("{}Choose (L)ogin or (R)egister: {}", GREEN, RESET);
        let Some(choice) = self.ask(&prompt).await? else {
            return Ok(SessionState::Terminated);
        };
        match choice.trim().to_ascii_lowercase().as_str() {
            "l" => Ok(SessionState::Authenticating),
            "r" => Ok(SessionState::Registering),
            _ => {
                self.error_line("Invalid choice. Please enter 'L' or 'R'.").await?;
                Ok(SessionState::AwaitingChoice)
            }
        }
    }

    async fn authenticate(&mut self) -> io::Result<SessionState> {
        let Some(username) = self.ask("Username: ").await? else {
            return Ok(SessionState::Terminated);
        };
        let username = username.trim().to_string();
        let Some(password) = self.ask_masked("Password: ").await? else {
            return Ok(SessionState::Terminated);
        };

        match self.ctx.users.authenticate(&username, &password).await {
            Ok(true) => {
                metrics::inc_login_ok();
                info!("Session {}: {} logged in", self.id, escape_log(&username));
                self.io
                    .write_text(&format!(
                        "\n{}Login successful! Welcome, {}!{}\n",
                        BOLD_GREEN, username, RESET
                    ))
                    .await?;
                self.username = Some(username);
                Ok(SessionState::MainMenu)
            }
            Ok(false) => {
                metrics::inc_login_failed();
                sec_log!(
                    "Failed login for {} from {}",
                    escape_log(&username),
                    self.peer
                );
                self.error_line(LOGIN_FAILED).await?;
                Ok(SessionState::AwaitingChoice)
            }
            Err(e) => {
                metrics::inc_login_failed();
                error!("Session {}: credential store error: {}", self.id, e);
                self.error_line(LOGIN_FAILED).await?;
                Ok(SessionState::AwaitingChoice)
            }
        }
    }

    async fn register(&mut self) -> io::Result<SessionState> {
        let Some(username) = self.ask("Choose a username: ").await? else {
            return Ok(SessionState::Terminated);
        };
        let username = username.trim().to_string();
        let Some(password) = self.ask_masked("Choose a password: ").await? else {
            return Ok(SessionState::Terminated);
        };

        match self.ctx.users.create_user(&username, &password).await {
            Ok(()) => {
                metrics::inc_registration();
                self.io
                    .write_text(&format!(
                        "\n{}Registration successful! Welcome, {}!{}\n",
                        BOLD_GREEN, username, RESET
                    ))
                    .await?;
                self.username = Some(username);
                Ok(SessionState::MainMenu)
            }
            Err(RegisterError::Store(e)) => {
                error!("Session {}: registration store error: {}", self.id, e);
                self.error_line("Registration failed: service unavailable, please try again later")
                    .await?;
                Ok(SessionState::AwaitingChoice)
            }
            Err(e) => {
                if matches!(e, RegisterError::UserExists(_)) {
                    sec_log!(
                        "Duplicate registration attempt for {} from {}",
                        escape_log(&username),
                        self.peer
                    );
                }
                self.error_line(&format!("Registration failed: {}", e)).await?;
                Ok(SessionState::AwaitingChoice)
            }
        }
    }

    fn relay(&self) -> Option<Arc<RelayBridge>> {
        self.ctx.relay.as_ref().filter(|r| r.is_connected()).cloned()
    }

    async fn main_menu(&mut self) -> io::Result<SessionState> {
        let relay_available = self.relay().is_some();
        let mut menu = format!("\n{}{} Menu:{}\n", CYAN, self.ctx.config.bbs.name, RESET);
        menu.push_str("1. Read messages\n2. Post message\n");
        if relay_available {
            menu.push_str("3. IRC Bridge\n");
        }
        menu.push_str("4. Logout\n");
        self.io.write_text(&menu).await?;

        let Some(choice) = self.ask("Choice: ").await? else {
            return Ok(SessionState::Terminated);
        };
        match choice.trim() {
            "1" => Ok(SessionState::ReadMessages),
            "2" => Ok(SessionState::PostMessage),
            "3" if relay_available => Ok(SessionState::RelayMode),
            "4" => Ok(SessionState::Terminated),
            _ => {
                self.error_line("Invalid choice. Please try again.").await?;
                Ok(SessionState::MainMenu)
            }
        }
    }

    async fn read_messages(&mut self) -> io::Result<SessionState> {
        match self.ctx.board.get_messages().await {
            Ok(lines) if lines.is_empty() => {
                self.io.write_text("No messages yet.\n").await?;
            }
            Ok(lines) => {
                let mut out = String::new();
                for line in &lines {
                    out.push_str(line);
                    out.push('\n');
                }
                self.io.write_text(&out).await?;
            }
            Err(e) => {
                error!("Session {}: board read failed: {}", self.id, e);
                self.error_line("Error reading messages, please try again later.")
                    .await?;
            }
        }
        Ok(SessionState::MainMenu)
    }

    async fn post_message(&mut self) -> io::Result<SessionState> {
        let Some(body) = self.ask("Enter your message: ").await? else {
            return Ok(SessionState::Terminated);
        };
        let Some(author) = self.username.clone() else {
            return Ok(SessionState::AwaitingChoice);
        };

        match self.ctx.board.post_message(&author, body.trim()).await {
            Ok(()) => {
                metrics::inc_message_posted();
                self.io
                    .write_text(&format!("{}Message posted successfully!{}\n", GREEN, RESET))
                    .await?;
            }
            Err(PostError::Invalid(e)) => {
                self.error_line(&format!("Error posting message: {}", e)).await?;
            }
            Err(PostError::Store(e)) => {
                error!("Session {}: board append failed: {}", self.id, e);
                self.error_line("Error posting message, please try again later.")
                    .await?;
            }
        }
        Ok(SessionState::MainMenu)
    }

    async fn relay_mode(&mut self) -> io::Result<SessionState> {
        let Some(relay) = self.relay() else {
            self.error_line("IRC Bridge is not available.").await?;
            return Ok(SessionState::MainMenu);
        };
        let username = self.username.clone().unwrap_or_default();

        let (replay, mut events) = match relay.replay_and_subscribe(relay.replay_lines()).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!("Session {}: relay unavailable: {}", self.id, e);
                self.error_line("IRC Bridge is not available.").await?;
                return Ok(SessionState::MainMenu);
            }
        };

        let mut intro = format!(
            "{}Entering IRC Bridge mode. Type '/quit' to exit.{}\n",
            CYAN, RESET
        );
        for line in &replay {
            intro.push_str(line);
            intro.push('\n');
        }
        self.io.write_text(&intro).await?;
        self.io.set_prompt("> ");

        loop {
            tokio::select! {
                line = self.io.read_line() => {
                    let Some(line) = line? else {
                        return Ok(SessionState::Terminated);
                    };
                    let text = line.trim();
                    if text == "/quit" {
                        self.io
                            .write_text(&format!("{}Exiting IRC Bridge mode.{}\n", CYAN, RESET))
                            .await?;
                        return Ok(SessionState::MainMenu);
                    }
                    if !text.is_empty() {
                        if let Err(e) = relay.broadcast(&username, text) {
                            warn!("Session {}: relay send failed: {}", self.id, e);
                            self.error_line(&format!("Message not relayed: {}", e)).await?;
                        }
                    }
                    self.io.set_prompt("> ");
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        self.io.write_async(&format!("{}\n", event.log_line())).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        self.io
                            .write_async(&format!("[{} relay messages skipped]\n", skipped))
                            .await?;
                    }
                    Err(RecvError::Closed) => {
                        self.io.write_text("\n").await?;
                        self.error_line("IRC Bridge closed.").await?;
                        return Ok(SessionState::MainMenu);
                    }
                },
            }
        }
    }
}
