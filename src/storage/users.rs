//! SQLite-backed account registry.

use argon2::{Algorithm, Argon2, Params, Version};
use log::{debug, info};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{blocking, StoreError};
use crate::logutil::escape_log;
use crate::validation::{validate_password, validate_username, PasswordError, UsernameError};

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("Invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    #[error("Invalid password: {0}")]
    InvalidPassword(#[from] PasswordError),

    #[error("Username '{0}' is already taken")]
    UserExists(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Durable user registry.
///
/// Writes are serialized by the connection mutex and the `UNIQUE` constraint
/// on `username`, so two racing registrations for one name produce exactly
/// one row. Hashing and verification run on the blocking pool outside the
/// mutex; only the short SQL statements hold it.
pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
    argon2: Argon2<'static>,
    /// Verified against when the username is unknown so both failure paths
    /// cost one Argon2 verification.
    decoy_hash: String,
}

impl UserStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, params: Option<Params>) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::from_connection(conn, params)?;
        info!("User database opened at {}", path.display());
        Ok(store)
    }

    /// Throwaway in-memory registry, used by tests and `status` dry runs.
    pub fn open_in_memory(params: Option<Params>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, params)
    }

    fn from_connection(conn: Connection, params: Option<Params>) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;

        let argon2 = match params {
            Some(p) => Argon2::new(Algorithm::Argon2id, Version::V0x13, p),
            None => Argon2::default(),
        };
        let decoy_hash = hash_with(&argon2, "relaybbs-decoy-password")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            argon2,
            decoy_hash,
        })
    }

    /// Register a new account. Input is validated before anything is hashed
    /// or written.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<(), RegisterError> {
        validate_username(username)?;
        validate_password(password)?;

        // Cheap pre-check; the UNIQUE constraint below is what actually decides races.
        if self.user_exists(username).await? {
            return Err(RegisterError::UserExists(username.to_string()));
        }

        let argon2 = self.argon2.clone();
        let secret = password.to_string();
        let hash = blocking(move || hash_with(&argon2, &secret)).await?;

        let conn = Arc::clone(&self.conn);
        let name = username.to_string();
        let inserted = blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            match conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                (&name, &hash),
            ) {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        if !inserted {
            return Err(RegisterError::UserExists(username.to_string()));
        }
        info!("Registered user {}", escape_log(username));
        Ok(())
    }

    /// Check a password. Unknown users and wrong passwords both yield `Ok(false)`.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let conn = Arc::clone(&self.conn);
        let name = username.to_string();
        let stored: Option<String> = blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            Ok(conn
                .query_row(
                    "SELECT password FROM users WHERE username = ?1",
                    [&name],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await?;

        let known = stored.is_some();
        let hash = stored.unwrap_or_else(|| self.decoy_hash.clone());
        let argon2 = self.argon2.clone();
        let secret = password.to_string();
        let matched = blocking(move || {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| StoreError::Hash(format!("corrupt stored hash: {e}")))?;
            Ok(argon2.verify_password(secret.as_bytes(), &parsed).is_ok())
        })
        .await?;

        debug!(
            "Authentication for {}: known={} matched={}",
            escape_log(username),
            known,
            matched
        );
        Ok(known && matched)
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        let conn = Arc::clone(&self.conn);
        let name = username.to_string();
        blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            let found: Option<i64> = conn
                .query_row("SELECT id FROM users WHERE username = ?1", [&name], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    pub async fn user_count(&self) -> Result<u64, StoreError> {
        let conn = Arc::clone(&self.conn);
        blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| StoreError::Hash(e.to_string()))
}
