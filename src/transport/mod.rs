//! # Transport Module - Listener Supervisors and Adapters
//!
//! Each transport owns an accept loop (`serve`) that hands every connection
//! to its own task:
//!
//! - [`line`] - plain TCP, one line per client newline ([`LineTransport`])
//! - [`ssh`] - SSH shell channels wrapped in a server-side line editor
//!   ([`TerminalTransport`])
//! - [`web`] - HTTP/JSON CRUD over the stores; no interactive session
//!
//! The interactive adapters implement [`crate::bbs::LineIo`] and run the
//! same [`crate::bbs::Session`] engine.

pub mod line;
pub mod ssh;
pub mod terminal;
pub mod web;

pub use line::LineTransport;
pub use terminal::TerminalTransport;
