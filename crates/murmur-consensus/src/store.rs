//! Replicated key-value store.
//!
//! [`StorageBackend`] is the raw get/put primitive; [`ReplicatedStore`]
//! wraps it with the last-writer-wins comparison so that a stored timestamp
//! can only ever grow.

use murmur_types::Entry;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::Result;

/// Raw storage for entries, keyed by entry key.
///
/// Implementations do not compare timestamps; `put` overwrites.
pub trait StorageBackend: Send + Sync {
    /// Returns the entry stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Entry>>;

    /// Stores `entry`, replacing any previous entry for its key.
    fn put(&self, entry: Entry) -> Result<()>;

    /// Returns every stored entry.
    fn entries(&self) -> Result<Vec<Entry>>;

    /// Returns the number of stored keys, tombstones included.
    fn len(&self) -> Result<usize>;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Entry>> {
        (**self).get(key)
    }

    fn put(&self, entry: Entry) -> Result<()> {
        (**self).put(entry)
    }

    fn entries(&self) -> Result<Vec<Entry>> {
        (**self).entries()
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}

/// An in-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryBackend {
    /// Creates an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, entry: Entry) -> Result<()> {
        self.entries.write().insert(entry.key.clone(), entry);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<Entry>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }
}

/// Result of offering an entry to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The entry was newer and is now stored.
    Applied,
    /// The stored entry is at least as new; nothing changed.
    Stale {
        /// The entry that stays stored.
        current: Entry,
    },
}

impl ApplyOutcome {
    /// Returns true if the entry was stored.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Last-writer-wins store on top of a [`StorageBackend`].
pub struct ReplicatedStore {
    backend: Box<dyn StorageBackend>,
    // Serializes compare-then-put so no write slips between the two.
    write_lock: Mutex<()>,
}

impl ReplicatedStore {
    /// Creates a store over an in-memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Creates a store over `backend`.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Stores `entry` if its timestamp is strictly greater than the stored one.
    pub fn apply(&self, entry: Entry) -> Result<ApplyOutcome> {
        let _guard = self.write_lock.lock();

        if let Some(current) = self.backend.get(&entry.key)? {
            if entry.timestamp <= current.timestamp {
                return Ok(ApplyOutcome::Stale { current });
            }
        }

        self.backend.put(entry)?;
        Ok(ApplyOutcome::Applied)
    }

    /// Returns the entry for `key`, tombstones included.
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        self.backend.get(key)
    }

    /// Returns every entry, sorted by key.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let mut entries = self.backend.entries()?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> Result<usize> {
        self.backend.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> Result<bool> {
        self.backend.is_empty()
    }
}

impl std::fmt::Debug for ReplicatedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedStore")
            .field("len", &self.backend.len().ok())
            .finish()
    }
}
