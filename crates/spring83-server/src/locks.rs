//! Per-key write serialization.
//!
//! A PUT reads the stored board, compares timestamps, then writes. Two
//! writers on the same key would otherwise both pass the comparison
//! against the same old board. Holding the key's lock across the
//! compare and the write orders them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use spring83_core::BoardKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<BoardKey, Arc<AsyncMutex<()>>>>,
}

/// Held while a writer owns a key. Dropping it releases the key.
pub struct KeyGuard<'a> {
    key: BoardKey,
    owner: &'a KeyLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &BoardKey) -> KeyGuard<'_> {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = entry.lock_owned().await;
        KeyGuard {
            key: key.clone(),
            owner: self,
            guard: Some(guard),
        }
    }

    /// Number of keys with a writer holding or waiting on them.
    pub fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Release first so a waiter can proceed, then drop the table entry
        // if nobody else holds a reference to it.
        self.guard.take();
        if let Some(entry) = locks.get(&self.key) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}
