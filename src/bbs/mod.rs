//! # BBS (Bulletin Board System) Core Module
//!
//! Transport-independent BBS behaviour: the per-connection session engine and
//! the server that owns the shared stores.
//!
//! ## Components
//!
//! - [`server`] - [`BbsServer`] lifecycle and the shared [`BbsContext`]
//! - [`session`] - Per-connection state machine
//! - [`io`] - The [`LineIo`] capability every interactive transport implements
//! - [`welcome`] - Welcome banner loading
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  BbsServer      │ ← Stores, relay bridge, one supervisor per transport
//! └─────────────────┘
//!          │ Arc<BbsContext>
//! ┌─────────────────┐
//! │  Session        │ ← One task per connection
//! └─────────────────┘
//!          │ LineIo
//! ┌─────────────────┐
//! │  Transport      │ ← TCP line adapter, SSH terminal
//! │  adapter        │
//! └─────────────────┘
//! ```
//!
//! ## Usage
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

pub mod io;
pub mod server;
pub mod session;
pub mod welcome;

pub use io::LineIo;
pub use server::{BbsContext, BbsServer};
pub use session::{Session, SessionState};
