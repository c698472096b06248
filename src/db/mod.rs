//! Persistence module for GridCast Sync
//!
//! The engine treats on-device persistence as an opaque key-value
//! collaborator: every durable piece of engine state (queue, status,
//! baseline snapshot, history) is serialized to JSON and written under a
//! well-known key. Two implementations are provided:
//!
//! - `SqliteStore`: SQLite-backed store using connection pooling
//! - `MemoryStore`: HashMap-backed store for tests and ephemeral profiles

use rusqlite::params;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

// Connection pooling
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Store error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Opaque key-value persistence collaborator.
///
/// Values are JSON strings; callers go through [`StateStoreExt`] for typed
/// access. Implementations must be safe to share across threads.
pub trait StateStore: Send + Sync {
    fn get_raw(&self, key: &str) -> StoreResult<Option<String>>;
    fn put_raw(&self, key: &str, value: &str) -> StoreResult<()>;
    fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Typed JSON access on top of [`StateStore`].
pub trait StateStoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>>;
    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()>;
}

impl<S: StateStore + ?Sized> StateStoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_raw(key)? {
            Some(json) => {
                let value: T = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put_raw(key, &json)
    }
}

// ============================================================================
// SQLite Store
// ============================================================================

/// SQLite-backed state store with connection pooling
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn open(db_path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let manager = SqliteConnectionManager::file(&db_path);

        let pool = Pool::builder()
            .max_size(8)
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        // Initialize one connection for schema and pragmas
        let conn = pool.get()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        log::info!("State store opened at {}", db_path.display());

        Ok(Self { pool })
    }

    /// Open a store in the platform data directory (`<data_dir>/gridcast/sync.db`)
    pub fn open_default() -> StoreResult<Self> {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::open(base.join("gridcast").join("sync.db"))
    }
}

impl StateStore for SqliteStore {
    fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.pool.get()?;
        let result: Result<String, _> = conn.query_row(
            "SELECT value FROM sync_state WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(json) => Ok(Some(json)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM sync_state WHERE key = ?1", [key])?;
        Ok(())
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory state store for tests and ephemeral profiles
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn put_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_sqlite_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(temp_dir.path().join("test.db")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_sqlite_roundtrip() {
        let (store, _temp) = create_sqlite_store();

        store.put_raw("sync.test", r#"{"n":1}"#).unwrap();
        assert_eq!(store.get_raw("sync.test").unwrap().as_deref(), Some(r#"{"n":1}"#));

        store.delete("sync.test").unwrap();
        assert!(store.get_raw("sync.test").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.db");

        {
            let store = SqliteStore::open(path.clone()).unwrap();
            store.put_raw("sync.durable", "42").unwrap();
        }

        let store = SqliteStore::open(path).unwrap();
        assert_eq!(store.get_raw("sync.durable").unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let (store, _temp) = create_sqlite_store();
        assert!(store.get_raw("sync.missing").unwrap().is_none());
    }

    #[test]
    fn test_typed_access() {
        let store = MemoryStore::new();

        let value = vec!["a".to_string(), "b".to_string()];
        store.put_json("sync.list", &value).unwrap();

        let loaded: Option<Vec<String>> = store.get_json("sync.list").unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn test_typed_access_bad_json() {
        let store = MemoryStore::new();
        store.put_raw("sync.bad", "not json").unwrap();

        let result: StoreResult<Option<Vec<String>>> = store.get_json("sync.bad");
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_memory_overwrite() {
        let store = MemoryStore::new();
        store.put_raw("k", "1").unwrap();
        store.put_raw("k", "2").unwrap();
        assert_eq!(store.get_raw("k").unwrap().as_deref(), Some("2"));
    }
}
