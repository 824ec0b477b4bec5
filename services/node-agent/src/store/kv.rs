//! SQLite-backed bucket store.
//!
//! One database file per bucket, one `kv` table per file. Values are JSON
//! documents; callers see typed records only.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Named bucket, one database file each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Service,
    Event,
    Configuration,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Event => "event",
            Self::Configuration => "configuration",
        }
    }

    /// File name of the bucket database inside the data directory.
    pub fn file_name(&self) -> String {
        format!("{}.db", self.as_str())
    }
}

/// Key-value store for a single bucket.
pub struct KvStore {
    bucket: Bucket,
    conn: Mutex<Connection>,
}

impl KvStore {
    /// Open or create the bucket database inside `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, bucket: Bucket) -> Result<Self, StoreError> {
        let path = dir.as_ref().join(bucket.file_name());
        let conn = Connection::open(&path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            bucket,
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        debug!(bucket = bucket.as_str(), path = %path.display(), "Opened bucket");
        Ok(store)
    }

    /// Open an in-memory bucket (for testing).
    pub fn open_in_memory(bucket: Bucket) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            bucket,
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    seq INTEGER NOT NULL
                );
                "#,
            )
        })?;
        Ok(())
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        // A poisoned lock only means another caller panicked mid-call; the
        // connection itself is still usable.
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn).map_err(Into::into)
    }

    /// Get a record by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        self.find(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Get a record by key if present.
    pub fn find<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    /// Insert or replace a record.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO kv (key, value, seq)
                VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM kv))
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
                params![key, raw],
            )
        })?;
        Ok(())
    }

    /// Insert a record only if the key is absent.
    ///
    /// Returns `false` when the key already existed.
    pub fn insert_new<T: Serialize>(&self, key: &str, value: &T) -> Result<bool, StoreError> {
        let raw = serde_json::to_string(value)?;
        let changed = self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO kv (key, value, seq)
                VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM kv))
                "#,
                params![key, raw],
            )
        })?;
        Ok(changed > 0)
    }

    /// Delete a record. Returns `false` if it did not exist.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let changed =
            self.with_conn(|conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]))?;
        Ok(changed > 0)
    }

    /// All records in insertion order.
    pub fn list<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let raws: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM kv ORDER BY seq")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })?;

        raws.iter()
            .map(|raw| serde_json::from_str(raw).map_err(Into::into))
            .collect()
    }
}
