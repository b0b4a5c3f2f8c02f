//! One file per board, named by the literal key.
//!
//! The file's modification time is the storage timestamp. Writes go to a
//! hidden temp file in the same directory and are renamed into place, so
//! readers only ever open a complete board.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use spring83_core::BoardKey;
use tracing::info;

use super::{BoardBackend, StoreError, StoredBoard};

const TEMP_PREFIX: &str = ".board-";

pub struct DirectoryBackend {
    root: PathBuf,
    /// Serializes renames against conditional deletes. Readers never take it.
    writes: Mutex<()>,
}

impl DirectoryBackend {
    /// Open the boards directory, creating it if needed.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(root)?;
        info!("Boards directory: {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            writes: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &BoardKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stored_at(&self, path: &Path) -> Result<Option<DateTime<Utc>>, StoreError> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl BoardBackend for DirectoryBackend {
    fn load(&self, key: &BoardKey) -> Result<Option<StoredBoard>, StoreError> {
        // Read body and mtime through one handle so a concurrent rename
        // cannot pair the new body with the old timestamp.
        let mut file = match File::open(self.path_for(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored_at = DateTime::<Utc>::from(file.metadata()?.modified()?);
        let mut body = Vec::new();
        file.read_to_end(&mut body)?;
        Ok(Some(StoredBoard { body, stored_at }))
    }

    fn save(&self, key: &BoardKey, body: &[u8], stored_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.root)?;
        tmp.write_all(body)?;
        tmp.as_file().sync_all()?;
        tmp.as_file().set_modified(SystemTime::from(stored_at))?;

        let _guard = self.write_guard();
        tmp.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &BoardKey) -> Result<bool, StoreError> {
        let _guard = self.write_guard();
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_if_stored_at(
        &self,
        key: &BoardKey,
        stored_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let path = self.path_for(key);
        let _guard = self.write_guard();
        if self.stored_at(&path)? != Some(stored_at) {
            return Ok(false);
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: &BoardKey) -> Result<bool, StoreError> {
        Ok(self.stored_at(&self.path_for(key))?.is_some())
    }

    fn keys(&self) -> Result<Vec<BoardKey>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            // Temp files and anything else that is not a key are skipped.
            if let Some(key) = entry.file_name().to_str().and_then(|n| BoardKey::parse(n).ok()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
