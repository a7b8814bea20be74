//! # Relay BBS - Multi-Transport Bulletin Board System
//!
//! Relay BBS is a classic Bulletin Board System reachable over plain TCP
//! (telnet), SSH and an HTTP/JSON API, with an optional bridge into IRC
//! channels.
//!
//! ## Features
//!
//! - **One session engine, several transports**: telnet and SSH clients drive
//!   the same state machine through the [`bbs::LineIo`] capability.
//! - **Accounts**: SQLite user table with Argon2id password hashes.
//! - **Message board**: an append-only flat file, one message per line.
//! - **IRC relay**: a single outbound IRC connection; channel traffic is logged
//!   to daily files and streamed live to users in relay mode, and their lines
//!   are sent back to every configured channel.
//! - **Async design**: Tokio, one task per connection.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaybbs::bbs::BbsServer;
//! use relaybbs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let server = BbsServer::new(config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bbs`] - Session engine, welcome banner and the server lifecycle
//! - [`transport`] - Telnet, SSH and HTTP listeners and adapters
//! - [`relay`] - IRC bridge: wire codec, event queue, daily logs
//! - [`storage`] - User database and message board
//! - [`config`] - Configuration management and validation
//! - [`validation`] - Username, password and message rules
//! - [`metrics`] - Process-wide counters
//! - [`logutil`] - Log-safe rendering of client text
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ ┌──────────┐ ┌──────────┐
//! │  Telnet  │ │   SSH    │ │   HTTP   │ ← transport supervisors
//! └────┬─────┘ └────┬─────┘ └────┬─────┘
//!      └─────┬──────┘            │
//! ┌──────────┴──────┐            │
//! │  Session engine │            │
//! └──┬───────────┬──┘            │
//!    │           │               │
//! ┌──┴───────┐ ┌─┴───────────────┴┐
//! │  Relay   │ │     Storage      │
//! │  bridge  │ │ (users, board)   │
//! └──────────┘ └──────────────────┘
//! ```

pub mod bbs;
pub mod config;
pub mod logutil;
pub mod metrics;
pub mod relay;
pub mod storage;
pub mod transport;
pub mod validation;
