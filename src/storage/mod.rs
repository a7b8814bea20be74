//! # Storage Module - Data Persistence Layer
//!
//! Two independent stores back every transport:
//!
//! - [`UserStore`] - account registry in SQLite with Argon2id password hashes
//! - [`MessageBoard`] - flat append-only text file, one message per line
//!
//! ```text
//! data/
//! ├── bbs.db          ← users (username UNIQUE, password hash)
//! └── guestbook.txt   ← "[2024-01-01 12:00:00] alice: hello board"
//! ```
//!
//! Each store owns its own exclusion discipline: there is no global lock, so a
//! slow password hash never blocks a board read and vice versa.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relaybbs::storage::{MessageBoard, UserStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let users = UserStore::open("./data/bbs.db".as_ref(), None)?;
//!     users.create_user("alice", "password1").await?;
//!     assert!(users.authenticate("alice", "password1").await?);
//!
//!     let board = MessageBoard::open("./data/guestbook.txt").await?;
//!     board.post_message("alice", "hello board").await?;
//!     for line in board.get_messages().await? {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod users;

pub use board::{MessageBoard, PostError};
pub use users::{RegisterError, UserStore};

/// Failure of the durable layer itself, as opposed to rejected input.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("password hash failure: {0}")]
    Hash(String),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Run synchronous file, database or hashing work off the async worker threads.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
