//! Board persistence.
//!
//! [`BoardStore`] is what the protocol engine talks to: it stamps writes
//! with the clock, hides expired boards from readers and deletes them on
//! the way out. The bytes themselves live in a [`BoardBackend`], either a
//! directory with one file per key ([`fs::DirectoryBackend`]) or an SQLite
//! table ([`sqlite::SqliteBackend`]).

pub mod fs;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use spring83_core::{BOARD_TTL, BoardKey};
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::StorageConfig;

/// Errors from the storage layer. Always an operator problem, never the client's.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("board storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("board database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt board record for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// The most recent accepted board for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBoard {
    pub body: Vec<u8>,
    /// When the server accepted the write. Expiry counts from here.
    pub stored_at: DateTime<Utc>,
}

/// Durable key → board mapping.
///
/// Implementations must make `save` atomic with respect to `load`: a
/// reader sees either the old record or the new one, never a mix.
pub trait BoardBackend: Send + Sync {
    fn load(&self, key: &BoardKey) -> Result<Option<StoredBoard>, StoreError>;

    fn save(&self, key: &BoardKey, body: &[u8], stored_at: DateTime<Utc>) -> Result<(), StoreError>;

    fn remove(&self, key: &BoardKey) -> Result<bool, StoreError>;

    /// Remove the record only while it still carries `stored_at`, so a
    /// write that lands between an expiry check and the delete survives.
    fn remove_if_stored_at(
        &self,
        key: &BoardKey,
        stored_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    fn contains(&self, key: &BoardKey) -> Result<bool, StoreError>;

    fn keys(&self) -> Result<Vec<BoardKey>, StoreError>;
}

/// TTL-aware view over a backend.
pub struct BoardStore {
    backend: Box<dyn BoardBackend>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl BoardStore {
    pub fn new(backend: Box<dyn BoardBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock, ttl: BOARD_TTL }
    }

    /// Open the backend named by the configuration.
    pub fn open(config: &StorageConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let backend: Box<dyn BoardBackend> = match config {
            StorageConfig::Directory { path } => Box::new(fs::DirectoryBackend::open(path)?),
            StorageConfig::Sqlite { path } => Box::new(sqlite::SqliteBackend::open(path)?),
        };
        Ok(Self::new(backend, clock))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - stored_at).to_std() {
            Ok(age) => age > self.ttl,
            // Stored "in the future" (clock stepped back): not expired.
            Err(_) => false,
        }
    }

    /// Read a board, treating expired records as absent and deleting them.
    pub fn get(&self, key: &BoardKey) -> Result<Option<StoredBoard>, StoreError> {
        let Some(record) = self.backend.load(key)? else {
            return Ok(None);
        };
        if self.is_expired(record.stored_at, self.clock.now()) {
            if self.backend.remove_if_stored_at(key, record.stored_at)? {
                debug!(key = %key, stored_at = %record.stored_at, "expired board deleted on read");
            }
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Read the raw record, expired or not, without side effects.
    pub fn load(&self, key: &BoardKey) -> Result<Option<StoredBoard>, StoreError> {
        self.backend.load(key)
    }

    /// Replace the board for `key`, stamped with the current time.
    pub fn put(&self, key: &BoardKey, body: &[u8]) -> Result<DateTime<Utc>, StoreError> {
        let stored_at = self.clock.now();
        self.backend.save(key, body, stored_at)?;
        Ok(stored_at)
    }

    /// Existence probe. Does not look at expiry and never deletes.
    pub fn exists(&self, key: &BoardKey) -> Result<bool, StoreError> {
        self.backend.contains(key)
    }

    pub fn delete(&self, key: &BoardKey) -> Result<bool, StoreError> {
        self.backend.remove(key)
    }

    /// Delete every expired record. Returns how many were removed.
    pub fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut removed = 0;
        for key in self.backend.keys()? {
            let Some(record) = self.backend.load(&key)? else {
                continue;
            };
            if self.is_expired(record.stored_at, now)
                && self.backend.remove_if_stored_at(&key, record.stored_at)?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Swept {removed} expired boards");
        }
        Ok(removed)
    }
}
