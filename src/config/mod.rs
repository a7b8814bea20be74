//! # Configuration Management Module
//!
//! All runtime settings for the BBS live in one TOML file. Every section has
//! defaults, so a partial file (or an empty one) is valid.
//!
//! ## Configuration Structure
//!
//! - [`BbsConfig`] - Station name, welcome screen and farewell text
//! - [`TelnetConfig`] - Plain line-oriented TCP listener
//! - [`SshConfig`] - Secure terminal listener
//! - [`WebConfig`] - HTTP/JSON API listener
//! - [`StorageConfig`] - User database and message board locations
//! - [`RelayConfig`] - IRC relay bridge
//! - [`LoggingConfig`] - Log level and log files
//! - [`SecurityConfig`] - Password hashing cost
//!
//! ## Configuration File Format
//!
//! ```toml
//! [bbs]
//! name = "Relay BBS"
//! welcome_screen = "welcome.ans"
//!
//! [telnet]
//! port = 2323
//!
//! [relay]
//! enabled = true
//! server = "irc.libera.chat"
//! port = 6697
//! use_tls = true
//! nick = "relaybbs"
//! channels = [{ name = "#relaybbs" }, { name = "#private", password = "hunter22" }]
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relaybbs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Telnet port: {}", config.telnet.port);
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bbs: BbsConfig,
    #[serde(default)]
    pub telnet: TelnetConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BbsConfig {
    pub name: String,
    /// Text or ANSI art shown on connect. A missing file yields a fallback banner.
    pub welcome_screen: String,
    pub farewell: String,
}

impl Default for BbsConfig {
    fn default() -> Self {
        Self {
            name: "Relay BBS".to_string(),
            welcome_screen: "welcome.ans".to_string(),
            farewell: "Goodbye!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelnetConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".to_string(),
            port: 2323,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    /// OpenSSH or PKCS#8 private key file. When unset or missing an ephemeral
    /// Ed25519 key is generated at start-up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key: Option<String>,
    /// Idle SSH connections are dropped after this many seconds (0 disables).
    pub inactivity_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".to_string(),
            port: 2222,
            host_key: None,
            inactivity_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    /// Directory of static files served next to the API, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_root: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".to_string(),
            port: 8080,
            web_root: Some("web".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// SQLite user database; relative names resolve inside `data_dir`.
    pub user_db: String,
    /// Flat message board file; relative names resolve inside `data_dir`.
    pub message_board: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            user_db: "bbs.db".to_string(),
            message_board: "guestbook.txt".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn user_db_path(&self) -> PathBuf {
        resolve_in(&self.data_dir, &self.user_db)
    }

    pub fn message_board_path(&self) -> PathBuf {
        resolve_in(&self.data_dir, &self.message_board)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayChannel {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub nick: String,
    pub realname: String,
    pub channels: Vec<RelayChannel>,
    /// Directory holding one `irc_YYYY-MM-DD.txt` segment per day.
    pub log_dir: String,
    pub queue_capacity: usize,
    /// Lines replayed when a user enters relay mode (at most 50).
    pub replay_lines: usize,
    pub connect_timeout_secs: u64,
    pub rejoin_delay_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server: String::new(),
            port: 6667,
            use_tls: false,
            nick: "relaybbs".to_string(),
            realname: "Relay BBS bridge".to_string(),
            channels: Vec::new(),
            log_dir: "logs".to_string(),
            queue_capacity: 1000,
            replay_lines: 50,
            connect_timeout_secs: 30,
            rejoin_delay_secs: 3,
            reconnect_delay_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("relaybbs.log".to_string()),
            security_file: Some("relaybbs-security.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Argon2Config {
    #[serde(default)]
    pub memory_kib: Option<u32>,
    #[serde(default)]
    pub time_cost: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub argon2: Option<Argon2Config>,
}

impl SecurityConfig {
    /// Build Argon2 parameters from the configured overrides, falling back to
    /// the library defaults for anything unset.
    pub fn argon2_params(&self) -> Result<Option<argon2::Params>> {
        let Some(cfg) = &self.argon2 else {
            return Ok(None);
        };
        let params = argon2::Params::new(
            cfg.memory_kib.unwrap_or(argon2::Params::DEFAULT_M_COST),
            cfg.time_cost.unwrap_or(argon2::Params::DEFAULT_T_COST),
            cfg.parallelism.unwrap_or(argon2::Params::DEFAULT_P_COST),
            None,
        )
        .map_err(|e| anyhow!("Invalid argon2 parameters: {}", e))?;
        Ok(Some(params))
    }
}

fn resolve_in(base: &str, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(base).join(path)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        Self::from_toml(&content).map_err(|e| anyhow!("Config file {}: {}", path, e))
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings that would fail later at runtime in a less obvious way.
    pub fn validate(&self) -> Result<()> {
        let mut ports: Vec<(&str, u16)> = Vec::new();
        if self.telnet.enabled {
            ports.push(("telnet", self.telnet.port));
        }
        if self.ssh.enabled {
            ports.push(("ssh", self.ssh.port));
        }
        if self.web.enabled {
            ports.push(("web", self.web.port));
        }
        for (i, (name, port)) in ports.iter().enumerate() {
            if let Some((other, _)) = ports[i + 1..].iter().find(|(_, p)| p == port) {
                bail!("{} and {} are both configured on port {}", name, other, port);
            }
        }

        let relay = &self.relay;
        if relay.queue_capacity == 0 {
            bail!("relay.queue_capacity must be at least 1");
        }
        if relay.replay_lines > 50 {
            bail!("relay.replay_lines must be 50 or fewer");
        }
        if relay.enabled {
            if relay.server.trim().is_empty() {
                bail!("relay.server is required when the relay is enabled");
            }
            if relay.nick.trim().is_empty() || relay.nick.contains(char::is_whitespace) {
                bail!("relay.nick must be a single non-empty word");
            }
            if relay.channels.is_empty() {
                bail!("relay.channels must list at least one channel");
            }
        }
        self.security.argon2_params()?;
        Ok(())
    }

    /// Names of the transports that will be started.
    pub fn enabled_transports(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.telnet.enabled {
            out.push(format!("telnet:{}", self.telnet.port));
        }
        if self.ssh.enabled {
            out.push(format!("ssh:{}", self.ssh.port));
        }
        if self.web.enabled {
            out.push(format!("web:{}", self.web.port));
        }
        out
    }
}
