//! Key-value persistence for timelines, sessions, flow and viewport state.
//!
//! The engine only needs `get`/`set`/`remove` over JSON values, so the backing
//! store is a trait. Three backends exist:
//!
//! - [`MemoryStore`]: tests and `--backend memory` runs
//! - [`FileStore`]: one JSON file per key, atomic temp-file + rename writes
//! - `SqliteStore`: lives in the daemon crate next to its rusqlite dependency
//!
//! # Key Layout
//!
//! Keys are namespaced by the case-normalized target and a record kind:
//!
//! ```text
//! somechannel:timeline
//! somechannel:sessions
//! somechannel:flow
//! somechannel:viewport
//! somechannel:fit-mode
//! somechannel:viewers:2026-01-31T10:00:00Z
//! settings:display
//! ```
//!
//! Each key has exactly one writer component. Nothing is transactional across
//! keys except [`Store::remove_all`] on backends that can offer it.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs_err as fs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{PresenceError, StoreError};

/// Global key for display settings (time zone and recents).
pub const DISPLAY_SETTINGS_KEY: &str = "settings:display";

// ═══════════════════════════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════════════════════════

/// A tracked target, normalized so `SomeChannel` and ` somechannel ` share keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn parse(raw: &str) -> Result<Self, PresenceError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() || normalized.contains(':') || normalized.contains('/') {
            return Err(PresenceError::InvalidTarget(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn record(&self, kind: RecordKind) -> String {
        format!("{}:{}", self.0, kind.suffix())
    }

    pub fn viewers(&self, session_id: &str) -> String {
        format!("{}:viewers:{}", self.0, session_id)
    }

    /// Prefix shared by every per-session viewer series key of this target.
    pub fn viewers_prefix(&self) -> String {
        format!("{}:viewers:", self.0)
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Timeline,
    Sessions,
    Flow,
    Viewport,
    FitMode,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Timeline,
        RecordKind::Sessions,
        RecordKind::Flow,
        RecordKind::Viewport,
        RecordKind::FitMode,
    ];

    fn suffix(self) -> &'static str {
        match self {
            RecordKind::Timeline => "timeline",
            RecordKind::Sessions => "sessions",
            RecordKind::Flow => "flow",
            RecordKind::Viewport => "viewport",
            RecordKind::FitMode => "fit-mode",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store trait
// ═══════════════════════════════════════════════════════════════════════════════

pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Keys currently stored that start with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Removes every key in `keys`. Backends with transactions override this so
    /// a clear is all-or-nothing.
    fn remove_all(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Reads and decodes a typed record. Missing keys and corrupt records both
/// yield `None`; corruption is logged so the record starts fresh.
pub fn load_record<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Option<T> {
    let value = match store.get(key) {
        Ok(Some(value)) => value,
        Ok(None) => return None,
        Err(err) => {
            warn!(key, error = %err, "Failed to read stored record; starting fresh");
            return None;
        }
    };

    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(key, error = %err, "Corrupt stored record; starting fresh");
            None
        }
    }
}

pub fn save_record<T: Serialize>(store: &dyn Store, key: &str, record: &T) -> Result<(), StoreError> {
    let value = serde_json::to_value(record).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &value)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memory backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn remove_all(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File backend
// ═══════════════════════════════════════════════════════════════════════════════

/// One `<encoded key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            context: format!("create store directory {}", dir.display()),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

/// Keys contain `:`, which is not portable in file names.
fn encode_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            ':' => '~',
            '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

fn decode_key(file_stem: &str) -> String {
    file_stem.replace('~', ":")
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            context: format!("read {}", path.display()),
            source,
        })?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                key: key.to_string(),
                details: err.to_string(),
            })
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;

        let io_err = |context: &str, source: std::io::Error| StoreError::Io {
            context: format!("{} {}", context, path.display()),
            source,
        };

        let mut temp_file =
            NamedTempFile::new_in(&self.dir).map_err(|err| io_err("create temp file for", err))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| io_err("write temp file for", err))?;
        temp_file
            .flush()
            .map_err(|err| io_err("flush temp file for", err))?;
        temp_file
            .persist(&path)
            .map_err(|err| io_err("persist", err.error))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                context: format!("remove {}", path.display()),
                source,
            }),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            context: format!("list {}", self.dir.display()),
            source,
        })?;

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                let key = decode_key(stem);
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Every key owned by `target`, including per-session viewer series.
pub fn target_keys(store: &dyn Store, target: &TargetKey) -> Result<Vec<String>, StoreError> {
    let mut keys: Vec<String> = RecordKind::ALL
        .iter()
        .map(|kind| target.record(*kind))
        .collect();
    keys.extend(store.keys_with_prefix(&target.viewers_prefix())?);
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn target_key_is_case_normalized() {
        let key = TargetKey::parse("  SomeChannel ").unwrap();
        assert_eq!(key.as_str(), "somechannel");
        assert_eq!(key.record(RecordKind::FitMode), "somechannel:fit-mode");
        assert_eq!(key.viewers("s1"), "somechannel:viewers:s1");
    }

    #[test]
    fn target_key_rejects_empty_and_separators() {
        assert!(TargetKey::parse("   ").is_err());
        assert!(TargetKey::parse("a:b").is_err());
        assert!(TargetKey::parse("a/b").is_err());
    }

    #[test]
    fn memory_store_round_trips_and_lists_prefixes() {
        let store = MemoryStore::new();
        store.set("chan:timeline", &json!({"users": {}})).unwrap();
        store.set("chan:viewers:s1", &json!([])).unwrap();
        store.set("other:viewers:s1", &json!([])).unwrap();

        assert_eq!(store.get("chan:timeline").unwrap(), Some(json!({"users": {}})));
        assert_eq!(
            store.keys_with_prefix("chan:viewers:").unwrap(),
            vec!["chan:viewers:s1".to_string()]
        );

        store.remove("chan:timeline").unwrap();
        assert_eq!(store.get("chan:timeline").unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        store.set("chan:sessions", &json!([{"id": "s1"}])).unwrap();

        let reopened = FileStore::open(temp.path()).unwrap();
        assert_eq!(
            reopened.get("chan:sessions").unwrap(),
            Some(json!([{"id": "s1"}]))
        );
        assert_eq!(
            reopened.keys_with_prefix("chan:").unwrap(),
            vec!["chan:sessions".to_string()]
        );
    }

    #[test]
    fn file_store_reports_corrupt_json() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        std::fs::write(temp.path().join("chan~flow.json"), "{not json").unwrap();

        let err = store.get("chan:flow").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn load_record_treats_corrupt_as_absent() {
        let store = MemoryStore::new();
        store.set("chan:sessions", &json!("not a list")).unwrap();
        let loaded: Option<Vec<String>> = load_record(&store, "chan:sessions");
        assert!(loaded.is_none());
    }

    #[test]
    fn remove_of_missing_key_is_ok() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        store.remove("chan:viewport").unwrap();
    }

    #[test]
    fn target_keys_include_viewer_series() {
        let store = MemoryStore::new();
        let target = TargetKey::parse("chan").unwrap();
        store.set(&target.viewers("s1"), &json!([])).unwrap();
        store.set(&target.viewers("s2"), &json!([])).unwrap();

        let keys = target_keys(&store, &target).unwrap();
        assert_eq!(keys.len(), RecordKind::ALL.len() + 2);
        assert!(keys.contains(&"chan:viewers:s2".to_string()));
    }
}
