//! SQLite-backed user authentication store.
//!
//! Tables:
//! - `users`: username, password_hash, salt, created_at
//! - `sessions`: token_hash, username, created_at, expires_at
//!
//! Passwords are stretched with iterated salted SHA-256; session tokens
//! are random 32-byte hex strings stored only as their SHA-256 hash, so
//! a leaked database reveals no usable token.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// An active session.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub expires_at: i64,
}

/// SQLite-backed authentication store.
pub struct AuthStore {
    conn: Mutex<rusqlite::Connection>,
    session_ttl_secs: u64,
}

impl AuthStore {
    /// Open (or create) the auth tables in the database at `db_path`.
    pub fn new(db_path: &Path, session_ttl_secs: u64) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety; foreign keys are
        // off by default in SQLite and must be switched on per connection.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token_hash TEXT PRIMARY KEY,
                username TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(username);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            session_ttl_secs,
        })
    }

    // ── User Management ─────────────────────────────────────────────

    /// Register a new user.
    pub fn register(&self, username: &str, password: &str) -> Result<()> {
        let trimmed = username.trim();
        if trimmed.is_empty() {
            bail!("Username cannot be empty");
        }
        if trimmed.len() > 64 {
            bail!("Username too long (max 64 characters)");
        }
        if password.len() < 8 {
            bail!("Password must be at least 8 characters");
        }

        let salt = generate_salt();
        let password_hash = hash_password(password, &salt);
        let now = epoch_secs();

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (username, password_hash, salt, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![trimmed, password_hash, salt, now as i64],
        );

        match result {
            Ok(_) => {
                tracing::info!(user = trimmed, "User registered");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("Username '{}' is already taken", trimmed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticate a user by username + password. Returns the stored
    /// (trimmed) username on success.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<String> {
        let conn = self.conn.lock();
        let row: Result<(String, String), _> = conn.query_row(
            "SELECT password_hash, salt FROM users WHERE username = ?1 COLLATE NOCASE",
            rusqlite::params![username.trim()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );

        match row {
            Ok((stored_hash, salt)) => {
                let attempt_hash = hash_password(password, &salt);
                if !constant_time_eq(stored_hash.as_bytes(), attempt_hash.as_bytes()) {
                    bail!("Invalid username or password");
                }
                Ok(username.trim().to_string())
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                // Perform dummy hash to prevent timing side-channel
                let _ = hash_password(password, "0000000000000000");
                bail!("Invalid username or password");
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Session Management ──────────────────────────────────────────

    /// Create a session token for an authenticated user. Expired
    /// sessions are swept on each mint, so the table never outgrows the
    /// set of live tokens. Returns the plaintext token (only revealed
    /// once).
    pub fn create_session(&self, username: &str) -> Result<String> {
        let swept = self.cleanup_expired_sessions()?;
        if swept > 0 {
            tracing::debug!(swept, "Swept expired sessions");
        }

        let token = generate_token();
        let token_hash = hash_token(&token);
        let now = epoch_secs();
        let expires_at = now + self.session_ttl_secs;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token_hash, username, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token_hash, username, now as i64, expires_at as i64],
        )?;

        Ok(token)
    }

    /// Validate a session token. Returns `None` if the token is unknown
    /// or expired.
    pub fn validate_session(&self, token: &str) -> Option<Session> {
        let token_hash = hash_token(token);
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();
        conn.query_row(
            "SELECT username, expires_at
             FROM sessions
             WHERE token_hash = ?1 AND expires_at > ?2",
            rusqlite::params![token_hash, now],
            |row| {
                Ok(Session {
                    username: row.get(0)?,
                    expires_at: row.get(1)?,
                })
            },
        )
        .ok()
    }

    /// Revoke a specific session by token.
    pub fn revoke_session(&self, token: &str) -> Result<bool> {
        let token_hash = hash_token(token);
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            rusqlite::params![token_hash],
        )?;
        Ok(deleted > 0)
    }

    /// Clean up expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<u64> {
        let now = epoch_secs() as i64;
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?;
        Ok(deleted as u64)
    }

    /// Count registered users.
    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ── Cryptographic Helpers ───────────────────────────────────────────

/// Generate a random salt (hex-encoded).
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a random session token (hex-encoded).
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using iterated SHA-256.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    // Iterated hashing for key stretching
    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// Hash a session token with single-pass SHA-256; the input is already
/// high-entropy.
fn hash_token(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    hex::encode(h.finalize())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, AuthStore) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("keywarden.db");
        let store = AuthStore::new(&db_path, 3600).unwrap();
        (tmp, store)
    }

    fn session_rows(store: &AuthStore) -> i64 {
        store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn register_and_authenticate() {
        let (_tmp, store) = test_store();

        store.register("test_user", "securepassword123").unwrap();
        let username = store.authenticate("test_user", "securepassword123").unwrap();
        assert_eq!(username, "test_user");
    }

    #[test]
    fn register_duplicate_username_fails() {
        let (_tmp, store) = test_store();

        store.register("test_user", "password123!").unwrap();
        let result = store.register("test_user", "otherpassword1");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already taken"));
    }

    #[test]
    fn register_case_insensitive_duplicate_fails() {
        let (_tmp, store) = test_store();

        store.register("TestUser", "password123!").unwrap();
        let result = store.register("testuser", "otherpassword1");
        assert!(result.is_err());
    }

    #[test]
    fn authenticate_wrong_password_fails() {
        let (_tmp, store) = test_store();

        store.register("test_user", "correct_password").unwrap();
        let result = store.authenticate("test_user", "wrong_password");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid"));
    }

    #[test]
    fn authenticate_nonexistent_user_fails() {
        let (_tmp, store) = test_store();

        let result = store.authenticate("ghost_user", "anypassword1");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid"));
    }

    #[test]
    fn register_empty_username_fails() {
        let (_tmp, store) = test_store();

        let result = store.register("", "password123!");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn register_long_username_fails() {
        let (_tmp, store) = test_store();

        let result = store.register(&"x".repeat(65), "password123!");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("too long"));
    }

    #[test]
    fn register_short_password_fails() {
        let (_tmp, store) = test_store();

        let result = store.register("test_user", "short");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("8 characters"));
    }

    #[test]
    fn session_create_and_validate() {
        let (_tmp, store) = test_store();

        store.register("test_user", "securepassword123").unwrap();
        let token = store.create_session("test_user").unwrap();
        assert!(!token.is_empty());

        let session = store.validate_session(&token);
        assert!(session.is_some());
        assert_eq!(session.unwrap().username, "test_user");
    }

    #[test]
    fn session_invalid_token_returns_none() {
        let (_tmp, store) = test_store();

        let session = store.validate_session("invalid_token_value");
        assert!(session.is_none());
    }

    #[test]
    fn sessions_require_an_existing_user() {
        let (_tmp, store) = test_store();

        // No such user registered; the foreign key rejects the insert.
        assert!(store.create_session("ghost_user").is_err());
        assert_eq!(session_rows(&store), 0);
    }

    #[test]
    fn session_revoke() {
        let (_tmp, store) = test_store();

        store.register("test_user", "securepassword123").unwrap();
        let token = store.create_session("test_user").unwrap();

        assert!(store.validate_session(&token).is_some());
        assert!(store.revoke_session(&token).unwrap());
        assert!(store.validate_session(&token).is_none());
    }

    #[test]
    fn revoking_unknown_token_reports_false() {
        let (_tmp, store) = test_store();
        assert!(!store.revoke_session("no_such_token").unwrap());
    }

    #[test]
    fn expired_sessions_fail_validation_and_get_cleaned_up() {
        let tmp = TempDir::new().unwrap();
        let store = AuthStore::new(&tmp.path().join("keywarden.db"), 0).unwrap();

        store.register("test_user", "securepassword123").unwrap();
        let token = store.create_session("test_user").unwrap();

        assert!(store.validate_session(&token).is_none());
        assert_eq!(store.cleanup_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn minting_a_session_sweeps_expired_rows() {
        let tmp = TempDir::new().unwrap();
        let store = AuthStore::new(&tmp.path().join("keywarden.db"), 0).unwrap();

        store.register("test_user", "securepassword123").unwrap();
        // With a zero TTL every session expires the moment it is minted,
        // so each mint sweeps its predecessor and one row survives.
        store.create_session("test_user").unwrap();
        store.create_session("test_user").unwrap();
        store.create_session("test_user").unwrap();

        assert_eq!(session_rows(&store), 1);
    }

    #[test]
    fn user_count_tracks_registrations() {
        let (_tmp, store) = test_store();

        assert_eq!(store.user_count().unwrap(), 0);
        store.register("user_a", "password123!").unwrap();
        assert_eq!(store.user_count().unwrap(), 1);
        store.register("user_b", "password456!").unwrap();
        assert_eq!(store.user_count().unwrap(), 2);
    }

    #[test]
    fn password_hash_is_deterministic_with_same_salt() {
        let h1 = hash_password("test_password", "fixed_salt_value");
        let h2 = hash_password("test_password", "fixed_salt_value");
        assert_eq!(h1, h2);
    }

    #[test]
    fn password_hash_differs_with_different_salt() {
        let h1 = hash_password("test_password", "salt_a");
        let h2 = hash_password("test_password", "salt_b");
        assert_ne!(h1, h2);
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
