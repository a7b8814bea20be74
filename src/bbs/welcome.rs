//! Welcome banner shown when a session starts.
//!
//! The banner is plain text or ANSI art read from the configured file on every
//! connect, so it can be edited without a restart. A missing or unreadable
//! file falls back to a short generated banner; the session always continues.

use log::warn;
use std::io::ErrorKind;

/// Blank lines separating the banner from the first prompt.
const TRAILER: &str = "\n\n\n\n\n";

/// Banner text for a new session, trailer included.
pub async fn load_banner(path: &str, bbs_name: &str) -> String {
    let body = match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == ErrorKind::NotFound => fallback(bbs_name, Some(path)),
        Err(e) => {
            warn!("Failed to read welcome screen {}: {}", path, e);
            fallback(bbs_name, None)
        }
    };
    format!("{}{}", body, TRAILER)
}

fn fallback(bbs_name: &str, missing: Option<&str>) -> String {
    match missing {
        Some(path) => format!(
            "Welcome to {}!\n\nWelcome screen file not found: {}\n",
            bbs_name, path
        ),
        None => format!("Welcome to {}!\n\n", bbs_name),
    }
}
