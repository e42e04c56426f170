//! Volume-location cache
//!
//! Remembers which volume a document (a numeric id for the sharded engine, a
//! relative path for the flat one) was last found in so that `find` probes
//! that volume first. Entries are written on every successful
//! resolution or store, dropped on delete, and never expire.

use crate::collections::FastBuildHasher;
use dashmap::DashMap;
use std::fmt;

/// Concurrent `(engine, document key) -> volume name` map
pub struct LocationCache {
    entries: DashMap<(String, String), String, FastBuildHasher>,
}

impl LocationCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(FastBuildHasher::default()),
        }
    }

    /// Volume the document was last seen on
    pub fn get(&self, engine: &str, key: &str) -> Option<String> {
        self.entries
            .get(&(engine.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Record (or overwrite) the document's volume
    pub fn put(&self, engine: &str, key: &str, volume: &str) {
        self.entries
            .insert((engine.to_string(), key.to_string()), volume.to_string());
    }

    /// Forget the document; absent entries are ignored
    pub fn remove(&self, engine: &str, key: &str) {
        self.entries.remove(&(engine.to_string(), key.to_string()));
    }

    /// Number of cached documents across all engines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LocationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let cache = LocationCache::new();
        assert!(cache.get("a", "1").is_none());

        cache.put("a", "1", "v1");
        cache.put("a", "1", "v2");
        cache.put("b", "1", "v3");

        assert_eq!(cache.get("a", "1").as_deref(), Some("v2"));
        assert_eq!(cache.get("b", "1").as_deref(), Some("v3"));
        assert_eq!(cache.len(), 2);

        cache.remove("a", "1");
        cache.remove("a", "1");
        assert!(cache.get("a", "1").is_none());
        assert_eq!(cache.len(), 1);
    }
}
