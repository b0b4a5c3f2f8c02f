//! Server configuration.
//!
//! Built in three layers: defaults, then an optional TOML file, then
//! command-line flags (which also read `SPRING83_*` environment
//! variables). The result is validated once and handed to the engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8083;
pub const DEFAULT_BOARDS_DIR: &str = "/opt/spring83/boards";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where boards are kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// One file per key; the file's mtime is the storage time.
    Directory { path: PathBuf },
    /// One row per key in an SQLite database.
    Sqlite { path: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Directory {
            path: PathBuf::from(DEFAULT_BOARDS_DIR),
        }
    }
}

/// What to do with a board whose `<time>` value does not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPolicy {
    /// Reject it with 400.
    #[default]
    Strict,
    /// Accept it and skip the monotonicity comparison.
    Permissive,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageConfig,
    /// Upper bound on handling one request, body read included.
    pub request_timeout_secs: u64,
    pub timestamp_policy: TimestampPolicy,
    /// Refuse writes under keys whose embedded expiry month has passed.
    pub enforce_key_expiry: bool,
    /// Period of the background expiry sweep. `None` leaves expiry lazy.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            storage: StorageConfig::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            timestamp_policy: TimestampPolicy::default(),
            enforce_key_expiry: false,
            sweep_interval_secs: None,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs cannot be 0".into()));
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(ConfigError::Invalid("sweep_interval_secs cannot be 0".into()));
        }
        Ok(())
    }

    /// `host:port`, suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

/// Spring '83 board server.
#[derive(Parser, Debug)]
#[command(name = "spring83d")]
#[command(about = "Serves and accepts signed Spring '83 boards")]
pub struct Args {
    /// TOML config file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "SPRING83_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SPRING83_PORT")]
    pub port: Option<u16>,

    /// Directory to store boards in, one file per key
    #[arg(long, env = "SPRING83_BOARDS_DIR", conflicts_with = "database")]
    pub boards_dir: Option<PathBuf>,

    /// Store boards in this SQLite database instead of a directory
    #[arg(long, env = "SPRING83_DATABASE")]
    pub database: Option<PathBuf>,

    /// Seconds allowed for one request, body included
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Accept boards whose <time> value does not parse
    #[arg(long)]
    pub permissive_timestamps: bool,

    /// Reject writes under keys past their embedded expiry month
    #[arg(long)]
    pub enforce_key_expiry: bool,

    /// Delete expired boards every N seconds instead of only on read
    #[arg(long)]
    pub sweep_interval: Option<u64>,
}

impl Args {
    /// Resolve the final configuration: file (if any), then flags.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_toml_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = self.database {
            config.storage = StorageConfig::Sqlite { path };
        } else if let Some(path) = self.boards_dir {
            config.storage = StorageConfig::Directory { path };
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout_secs = secs;
        }
        if self.permissive_timestamps {
            config.timestamp_policy = TimestampPolicy::Permissive;
        }
        if self.enforce_key_expiry {
            config.enforce_key_expiry = true;
        }
        if let Some(secs) = self.sweep_interval {
            config.sweep_interval_secs = Some(secs);
        }

        config.validate()?;
        Ok(config)
    }
}
