//! Append-only message board stored as a flat text file.

use chrono::Local;
use fs2::FileExt;
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::{blocking, StoreError};
use crate::logutil::escape_log;
use crate::validation::{normalize_message_body, MessageError};

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("{0}")]
    Invalid(#[from] MessageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Message board log.
///
/// An in-process `RwLock` lets readers proceed together while each append is
/// exclusive; an advisory `fs2` lock on the file itself extends the same
/// discipline to other processes sharing the board.
pub struct MessageBoard {
    path: PathBuf,
    guard: RwLock<()>,
}

impl MessageBoard {
    /// Open the board, creating the file (and its directory) if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            guard: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate and append one message as `[timestamp] author: body`.
    pub async fn post_message(&self, author: &str, body: &str) -> Result<(), PostError> {
        let body = normalize_message_body(body)?;
        let line = format!(
            "[{}] {}: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            author,
            body
        );

        let _write = self.guard.write().await;
        let path = self.path.clone();
        blocking(move || Ok(append_line_locked(&path, &line)?)).await?;
        debug!("Board append by {}: {}", escape_log(author), escape_log(&body));
        Ok(())
    }

    /// Every line currently on the board, oldest first.
    pub async fn get_messages(&self) -> Result<Vec<String>, StoreError> {
        let _read = self.guard.read().await;
        let path = self.path.clone();
        let content = blocking(move || Ok(read_locked(&path)?)).await?;
        Ok(content.lines().map(str::to_string).collect())
    }

    pub async fn message_count(&self) -> Result<usize, StoreError> {
        Ok(self.get_messages().await?.len())
    }
}

/// Append `line` with a single write while holding an exclusive file lock.
fn append_line_locked(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
    if let Err(e) = file.unlock() {
        warn!("Failed to unlock board file {}: {}", path.display(), e);
    }
    written
}

fn read_locked(path: &Path) -> std::io::Result<String> {
    let mut file = OpenOptions::new().read(true).open(path)?;
    file.lock_shared()?;
    let mut content = String::new();
    let read = file.read_to_string(&mut content);
    let _ = file.unlock();
    read?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn line_format_has_timestamp_author_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let board = MessageBoard::open(dir.path().join("board.txt")).await.unwrap();
        board.post_message("alice", "hello board").await.unwrap();
        let lines = board.get_messages().await.unwrap();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.starts_with('['), "{line}");
        // "[YYYY-MM-DD HH:MM:SS] " is 22 characters
        assert_eq!(&line[21..], " alice: hello board");
    }

    #[tokio::test]
    async fn post_waits_for_foreign_lock_without_stalling_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.txt");
        let board = std::sync::Arc::new(MessageBoard::open(&path).await.unwrap());

        // Another process holding the board
        let holder = OpenOptions::new().append(true).open(&path).unwrap();
        holder.lock_exclusive().unwrap();

        let posting = tokio::spawn({
            let board = board.clone();
            async move { board.post_message("alice", "queued").await }
        });
        // Single-threaded runtime: this only wakes if the post is parked off-thread
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!posting.is_finished());

        holder.unlock().unwrap();
        let posted = tokio::time::timeout(std::time::Duration::from_secs(5), posting)
            .await
            .unwrap()
            .unwrap();
        assert!(posted.is_ok());
        assert_eq!(board.message_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn open_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("board.txt");
        let board = MessageBoard::open(&path).await.unwrap();
        assert!(path.exists());
        assert!(board.get_messages().await.unwrap().is_empty());
    }
}
