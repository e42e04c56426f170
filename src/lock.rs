//! Named key locks
//!
//! A [`KeyLockRegistry`] hands out one mutex per [`LockKey`], created on first
//! use. Engines serialize work on the same document, the same volume or the
//! whole store by locking the matching key:
//!
//! ```text
//! STORAGE-<NAME>                  whole store (rebuild)
//! STORAGE_UID-<NAME>-<ID>         one document id
//! STORAGE_VOLUME-<NAME>-<VOLUME>  directory mutation on one volume
//! ```
//!
//! Keys are upper-cased, so `"Archive"` and `"ARCHIVE"` share a lock.
//! Acquisition order is always document (or store) first, then volume.
//!
//! Entries are never evicted: the table grows by one mutex per distinct
//! document id touched during the process lifetime.

use crate::collections::FastBuildHasher;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Lock scope tag plus scoped value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Whole store of the named engine
    Storage(String),
    /// One document of the named engine
    StorageUid(String, String),
    /// One volume of the named engine
    StorageVolume(String, String),
}

impl LockKey {
    /// Whole-store key
    pub fn storage(engine: &str) -> Self {
        LockKey::Storage(engine.to_string())
    }

    /// Per-document key
    pub fn uid(engine: &str, id: impl fmt::Display) -> Self {
        LockKey::StorageUid(engine.to_string(), id.to_string())
    }

    /// Per-volume key
    pub fn volume(engine: &str, volume: &str) -> Self {
        LockKey::StorageVolume(engine.to_string(), volume.to_string())
    }

    /// Canonical upper-case registry key
    pub fn key(&self) -> String {
        let raw = match self {
            LockKey::Storage(engine) => format!("STORAGE-{}", engine),
            LockKey::StorageUid(engine, id) => format!("STORAGE_UID-{}-{}", engine, id),
            LockKey::StorageVolume(engine, volume) => {
                format!("STORAGE_VOLUME-{}-{}", engine, volume)
            }
        };
        raw.to_uppercase()
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Lazily populated table of named mutexes
///
/// Cloning the returned `Arc<Mutex<()>>` and locking it outside the map keeps
/// the shard lock of the underlying `DashMap` short: callers block on the key
/// mutex, never on the table.
pub struct KeyLockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>, FastBuildHasher>,
}

impl KeyLockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            locks: DashMap::with_hasher(FastBuildHasher::default()),
        }
    }

    /// Get (creating on first use) the mutex for `key`
    ///
    /// Lock it with `registry.get(&key).lock()`; the guard borrows the returned
    /// `Arc`, so bind the `Arc` first when the guard must outlive the statement.
    pub fn get(&self, key: &LockKey) -> Arc<Mutex<()>> {
        let name = key.key();
        if let Some(existing) = self.locks.get(&name) {
            return Arc::clone(existing.value());
        }

        trace!("Creating lock {}", name);
        Arc::clone(
            self.locks
                .entry(name)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Number of distinct keys ever locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key has been locked yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyLockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLockRegistry")
            .field("keys", &self.locks.len())
            .finish()
    }
}
