//! SQLite board backend.
//!
//! One row per key. An upsert replaces body and storage time in a single
//! statement, which gives the same all-or-nothing visibility as the
//! directory backend's rename.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use spring83_core::BoardKey;
use tracing::info;

use super::{BoardBackend, StoreError, StoredBoard};

/// Boards persisted in an SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        info!("Database opened: {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
        // WAL lets readers proceed while a write is in flight.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS boards (
                key        TEXT PRIMARY KEY,
                body       BLOB NOT NULL,
                stored_at  INTEGER NOT NULL
            );",
        )
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(key: &BoardKey, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        key: key.to_string(),
        reason: format!("stored_at out of range: {millis}"),
    })
}

impl BoardBackend for SqliteBackend {
    fn load(&self, key: &BoardKey) -> Result<Option<StoredBoard>, StoreError> {
        let row: Option<(Vec<u8>, i64)> = self
            .conn()
            .query_row(
                "SELECT body, stored_at FROM boards WHERE key = ?1",
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((body, millis)) => Ok(Some(StoredBoard {
                body,
                stored_at: from_millis(key, millis)?,
            })),
            None => Ok(None),
        }
    }

    fn save(&self, key: &BoardKey, body: &[u8], stored_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO boards (key, body, stored_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, stored_at = excluded.stored_at",
            params![key.as_str(), body, to_millis(stored_at)],
        )?;
        Ok(())
    }

    fn remove(&self, key: &BoardKey) -> Result<bool, StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM boards WHERE key = ?1", params![key.as_str()])?;
        Ok(removed > 0)
    }

    fn remove_if_stored_at(
        &self,
        key: &BoardKey,
        stored_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let removed = self.conn().execute(
            "DELETE FROM boards WHERE key = ?1 AND stored_at = ?2",
            params![key.as_str(), to_millis(stored_at)],
        )?;
        Ok(removed > 0)
    }

    fn contains(&self, key: &BoardKey) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM boards WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn keys(&self) -> Result<Vec<BoardKey>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM boards ORDER BY key")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        names
            .into_iter()
            .map(|name| {
                BoardKey::parse(&name).map_err(|e| StoreError::Corrupt {
                    key: name.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}
