//! Durable key/value storage for fieldsync.
//!
//! A single `SQLite` database backs both the local record cache and the
//! pending operation queue. Keys are plain strings; callers own the key
//! layout (see [`crate::cache`] and [`crate::queue`]).

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Storage engine shared by the cache and the queue.
///
/// The connection sits behind a mutex so a `Storage` can be shared through
/// an `Arc` between the coordinator and its background task. Every method
/// holds the lock for a single statement or a single transaction.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // FULL rather than NORMAL: a queued write must survive power loss.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("storage connection lock poisoned"))
    }

    /// Read the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        read(&conn, key)
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        write(&conn, key, value)
    }

    /// Remove `key`. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        remove(&conn, key)
    }

    /// Remove every key starting with `prefix`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let affected = self.lock()?.execute(
            "DELETE FROM kv_store WHERE substr(key, 1, length(?1)) = ?1",
            [prefix],
        )?;
        if affected > 0 {
            info!("Removed {} keys with prefix '{}'", affected, prefix);
        }
        Ok(affected)
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r"
            SELECT key, value FROM kv_store
            WHERE substr(key, 1, length(?1)) = ?1
            ORDER BY key
            ",
        )?;
        let rows = stmt
            .query_map([prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_prefix(&self, prefix: &str) -> Result<usize> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM kv_store WHERE substr(key, 1, length(?1)) = ?1",
            [prefix],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Run `f` inside a single transaction, committing if it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a database error if the transaction
    /// cannot be started or committed.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_keys = self.count_prefix("")?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_keys,
            db_size_bytes,
        })
    }
}

/// Read a value through an existing connection or transaction.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn read(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

/// Write a value through an existing connection or transaction.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn write(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO kv_store (key, value, updated_at)
        VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        ",
        params![key, value],
    )?;
    Ok(())
}

/// Remove a key through an existing connection or transaction.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn remove(conn: &Connection, key: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
    Ok(affected > 0)
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of keys stored.
    pub total_keys: usize,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn temp_db_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "fieldsync_{tag}_{}_{}.db",
            std::process::id(),
            uuid::Uuid::new_v4()
        ))
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[test]
    fn test_put_and_get() {
        let storage = create_test_storage();
        storage.put("a", "1").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        assert!(storage.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces() {
        let storage = create_test_storage();
        storage.put("a", "1").unwrap();
        storage.put("a", "2").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("2"));
        assert_eq!(storage.count_prefix("").unwrap(), 1);
    }

    #[test]
    fn test_remove() {
        let storage = create_test_storage();
        storage.put("a", "1").unwrap();
        assert!(storage.remove("a").unwrap());
        assert!(!storage.remove("a").unwrap());
        assert!(storage.get("a").unwrap().is_none());
    }

    #[test]
    fn test_prefix_operations_treat_wildcards_literally() {
        let storage = create_test_storage();
        storage.put("cache:a", "1").unwrap();
        storage.put("cache:b", "2").unwrap();
        storage.put("cache_x", "3").unwrap();
        storage.put("sync:q", "[]").unwrap();

        assert_eq!(storage.count_prefix("cache:").unwrap(), 2);
        let scanned = storage.scan_prefix("cache:").unwrap();
        assert_eq!(
            scanned,
            vec![
                ("cache:a".to_string(), "1".to_string()),
                ("cache:b".to_string(), "2".to_string())
            ]
        );

        // '%' and '_' must not act as LIKE wildcards.
        assert_eq!(storage.count_prefix("cache%").unwrap(), 0);

        assert_eq!(storage.remove_prefix("cache:").unwrap(), 2);
        assert_eq!(storage.count_prefix("").unwrap(), 2);
    }

    #[test]
    fn test_transaction_commits() {
        let storage = create_test_storage();
        storage
            .transaction(|tx| {
                write(tx, "x", "1")?;
                write(tx, "y", "2")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(storage.count_prefix("").unwrap(), 2);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let storage = create_test_storage();
        let result: Result<()> = storage.transaction(|tx| {
            write(tx, "x", "1")?;
            Err(Error::internal("abort"))
        });
        assert!(result.is_err());
        assert!(storage.get("x").unwrap().is_none());
    }

    #[test]
    fn test_open_file_based_persists() {
        let db_path = temp_db_path("persist");

        let storage = Storage::open(&db_path).unwrap();
        storage.put("k", "v").unwrap();
        assert_eq!(storage.path(), db_path);
        drop(storage);

        let reopened = Storage::open(&db_path).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
        assert!(reopened.stats().unwrap().db_size_bytes > 0);

        drop(reopened);
        cleanup(&db_path);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let root = std::env::temp_dir().join(format!("fieldsync_nested_{}", uuid::Uuid::new_v4()));
        let nested_path = root.join("nested/db.sqlite");

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_stats_in_memory() {
        let storage = create_test_storage();
        storage.put("a", "1").unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_keys, 1);
        assert_eq!(stats.db_size_bytes, 0);
    }
}
