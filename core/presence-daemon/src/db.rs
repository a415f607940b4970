//! SQLite-backed [`Store`] for the daemon.
//!
//! One `kv` table keyed by store key, JSON text values. A connection is opened
//! per call; WAL plus a busy timeout let `show` read while `run` writes.

use chrono::Utc;
use presence_core::{Store, StoreError};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::path::PathBuf;

pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let store = Self { path };
        store.init_schema().map_err(StoreError::Backend)?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.connect()?;
        op(&mut conn)
    }

    fn connect(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create store directory: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl Store for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .with_connection(|conn| {
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(|err| format!("Failed to read {}: {}", key, err))
            })
            .map_err(StoreError::Backend)?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| StoreError::Corrupt {
                    key: key.to_string(),
                    details: err.to_string(),
                }),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        let updated_at = Utc::now().to_rfc3339();

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET \
                    value = excluded.value, \
                    updated_at = excluded.updated_at",
                params![key, raw, updated_at],
            )
            .map(|_| ())
            .map_err(|err| format!("Failed to write {}: {}", key, err))
        })
        .map_err(StoreError::Backend)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map(|_| ())
                .map_err(|err| format!("Failed to delete {}: {}", key, err))
        })
        .map_err(StoreError::Backend)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.with_connection(|conn| {
            // substr avoids LIKE wildcard escaping for keys containing `_` or `%`.
            let mut stmt = conn
                .prepare(
                    "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key ASC",
                )
                .map_err(|err| format!("Failed to prepare key scan: {}", err))?;
            let rows = stmt
                .query_map(params![prefix], |row| row.get::<_, String>(0))
                .map_err(|err| format!("Failed to scan keys: {}", err))?;

            let mut keys = Vec::new();
            for row in rows {
                keys.push(row.map_err(|err| format!("Failed to decode key row: {}", err))?);
            }
            Ok(keys)
        })
        .map_err(StoreError::Backend)
    }

    fn remove_all(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to start clear transaction: {}", err))?;
            for key in keys {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![key])
                    .map_err(|err| format!("Failed to delete {}: {}", key, err))?;
            }
            tx.commit()
                .map_err(|err| format!("Failed to commit clear: {}", err))
        })
        .map_err(StoreError::Backend)
    }
}
