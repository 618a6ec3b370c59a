//! Local record cache.
//!
//! Holds the last known value of every record read or written on this
//! device. The cache is an optimization: every failure is logged and turned
//! into a miss or a dropped write, never returned to the caller.

use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};

use crate::path::RecordPath;
use crate::storage::Storage;

/// Key prefix for cache entries in the shared store.
pub const CACHE_PREFIX: &str = "cache:";

/// Durable cache of record values keyed by [`RecordPath`].
#[derive(Debug, Clone)]
pub struct LocalCache {
    storage: Arc<Storage>,
}

impl LocalCache {
    /// Create a cache view over the shared storage.
    #[must_use]
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Storage key for a record path.
    #[must_use]
    pub fn key_for(path: &RecordPath) -> String {
        format!("{CACHE_PREFIX}{path}")
    }

    /// Last known value for `path`, or `None` on miss.
    ///
    /// A stored value that is not valid JSON counts as a miss.
    #[must_use]
    pub fn get(&self, path: &RecordPath) -> Option<Value> {
        let raw = match self.storage.get(&Self::key_for(path)) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(path = %path, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path, error = %e, "malformed cache entry, treating as miss");
                None
            }
        }
    }

    /// Store `value` for `path`. Best effort.
    pub fn set(&self, path: &RecordPath, value: &Value) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path, error = %e, "cannot serialize cache entry");
                return;
            }
        };
        match self.storage.put(&Self::key_for(path), &raw) {
            Ok(()) => trace!(path = %path, "cache entry written"),
            Err(e) => warn!(path = %path, error = %e, "cache write failed"),
        }
    }

    /// Remove the entry for `path`. Best effort.
    pub fn delete(&self, path: &RecordPath) {
        if let Err(e) = self.storage.remove(&Self::key_for(path)) {
            warn!(path = %path, error = %e, "cache delete failed");
        }
    }

    /// Remove every entry whose key starts with the cache prefix followed by
    /// `prefix`. An empty `prefix` clears the whole cache.
    ///
    /// Returns the number of removed entries (0 on failure).
    pub fn delete_all_with_prefix(&self, prefix: &str) -> usize {
        match self.storage.remove_prefix(&format!("{CACHE_PREFIX}{prefix}")) {
            Ok(count) => count,
            Err(e) => {
                warn!(prefix, error = %e, "cache prefix delete failed");
                0
            }
        }
    }

    /// Every readable cache entry, in path order.
    ///
    /// Entries with malformed keys or values are skipped.
    #[must_use]
    pub fn entries(&self) -> Vec<(RecordPath, Value)> {
        let rows = match self.storage.scan_prefix(CACHE_PREFIX) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "cache scan failed");
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter_map(|(key, raw)| {
                let path = RecordPath::parse(key.strip_prefix(CACHE_PREFIX)?).ok()?;
                match serde_json::from_str(&raw) {
                    Ok(value) => Some((path, value)),
                    Err(e) => {
                        warn!(path = %path, error = %e, "skipping malformed cache entry");
                        None
                    }
                }
            })
            .collect()
    }

    /// Number of cached entries (0 on failure).
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.count_prefix(CACHE_PREFIX).unwrap_or_else(|e| {
            warn!(error = %e, "cache count failed");
            0
        })
    }

    /// Check whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_cache() -> (LocalCache, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        (LocalCache::new(Arc::clone(&storage)), storage)
    }

    fn path(raw: &str) -> RecordPath {
        RecordPath::parse(raw).unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let (cache, _) = create_test_cache();
        let p = path("checklists/2024/a/b");

        assert!(cache.get(&p).is_none());
        cache.set(&p, &json!({"answer": "yes"}));
        assert_eq!(cache.get(&p), Some(json!({"answer": "yes"})));
    }

    #[test]
    fn test_delete() {
        let (cache, _) = create_test_cache();
        let p = path("x");
        cache.set(&p, &json!(1));
        cache.delete(&p);
        assert!(cache.get(&p).is_none());
    }

    #[test]
    fn test_malformed_entry_is_miss() {
        let (cache, storage) = create_test_cache();
        let p = path("broken");
        storage.put(&LocalCache::key_for(&p), "{not json").unwrap();

        assert!(cache.get(&p).is_none());
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_delete_all_with_prefix() {
        let (cache, storage) = create_test_cache();
        cache.set(&path("checklists/2024/a"), &json!(1));
        cache.set(&path("checklists/2025/a"), &json!(2));
        cache.set(&path("schedules/2024/s"), &json!(3));
        storage.put("sync:pending_operations", "[]").unwrap();

        assert_eq!(cache.delete_all_with_prefix("checklists/2024"), 1);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.delete_all_with_prefix(""), 2);
        assert!(cache.is_empty());
        assert!(storage.get("sync:pending_operations").unwrap().is_some());
    }

    #[test]
    fn test_entries_in_path_order() {
        let (cache, _) = create_test_cache();
        cache.set(&path("b"), &json!("second"));
        cache.set(&path("a"), &json!("first"));

        let entries = cache.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.as_str(), "a");
        assert_eq!(entries[1].1, json!("second"));
    }
}
