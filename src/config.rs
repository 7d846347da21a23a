//! Configuration loading.
//!
//! The config is a small TOML file with `[server]` and `[client]`
//! tables. Every field has a default suitable for local development, so
//! a missing file or an empty one both yield a working setup. A handful
//! of `KEYWARDEN_*` environment variables override the file for
//! container and CI use.

use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_QUALIFIER: &str = "io";
const APP_ORG: &str = "keywarden";
const APP_NAME: &str = "keywarden";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_STORAGE_KEY: &str = "keywarden";
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

/// Settings for `keywarden serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub bind_addr: String,
    /// SQLite database file. Defaults to the platform data directory.
    pub db_path: String,
    /// Passphrase for at-rest encryption of stored records.
    pub storage_key: String,
    /// Session token lifetime in seconds.
    pub session_ttl_secs: u64,
}

/// Settings for the client commands (`shell`, `sync`, `read`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the vault server.
    pub server_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            db_path: default_db_path(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

impl Config {
    /// Load the config from a file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let s = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let mut config: Config = toml::from_str(&s)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Load the config file if given, otherwise start from defaults.
    /// Environment overrides apply either way.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Config> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Config::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    /// Fold `KEYWARDEN_*` environment variables into the config.
    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("KEYWARDEN_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Ok(path) = std::env::var("KEYWARDEN_DB_PATH") {
            self.server.db_path = path;
        }
        if let Ok(key) = std::env::var("KEYWARDEN_STORAGE_KEY") {
            self.server.storage_key = key;
        }
        if let Ok(ttl) = std::env::var("KEYWARDEN_SESSION_TTL_SECS") {
            if let Ok(secs) = ttl.parse() {
                self.server.session_ttl_secs = secs;
            }
        }
        if let Ok(url) = std::env::var("KEYWARDEN_SERVER_URL") {
            self.client.server_url = url;
        }
    }

    /// Database path with `~` expanded.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.server.db_path).into_owned())
    }
}

/// Platform data directory for the database, falling back to the
/// working directory when the environment provides none.
fn default_db_path() -> String {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.data_dir().join("keywarden.db"))
        .unwrap_or_else(|| PathBuf::from("keywarden.db"))
        .to_string_lossy()
        .into_owned()
}
