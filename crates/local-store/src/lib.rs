//! Key-value storage for client state (endpoints, active endpoint, settings).
//!
//! Values are JSON documents. [`JsonFileStore`] keeps every key in one file
//! and rewrites it atomically on each mutation; [`MemoryStore`] is for tests
//! and ephemeral sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON for key `{key}`: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read `key` as `T`. Missing keys are `Ok(None)`.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Json {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Json {
        key: key.to_string(),
        source,
    })?;
    store.set(key, value)
}

/// Like [`get_json`] but logs and returns `None` on any failure.
pub fn load_or_warn<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match get_json(store, key) {
        Ok(value) => value,
        Err(e) => {
            warn!("ignoring stored `{key}`: {e}");
            None
        }
    }
}

/// Like [`set_json`] but only logs failures.
pub fn persist_or_warn<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) {
    if let Err(e) = set_json(store, key, value) {
        warn!("failed to persist `{key}`: {e}");
    }
}

pub fn remove_or_warn(store: &dyn KeyValueStore, key: &str) {
    if let Err(e) = store.remove(key) {
        warn!("failed to remove `{key}`: {e}");
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

// ── JSON file ─────────────────────────────────────────────────────────────

/// All keys in one JSON object on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`. A corrupt file is logged
    /// and treated as empty; it is overwritten on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, Value>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("store at {} is not valid JSON, starting empty: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }

    fn flush(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = serde_json::to_vec_pretty(entries).map_err(|source| StoreError::Json {
            key: "*".to_string(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state").join("store.json");
        {
            let store = JsonFileStore::open(&path).expect("open");
            set_json(&store, "opencode-current-server", "default").expect("set");
            store.set("opencode-servers", json!([{"id": "default"}])).expect("set");
        }
        let store = JsonFileStore::open(&path).expect("reopen");
        let active: Option<String> = get_json(&store, "opencode-current-server").expect("get");
        assert_eq!(active.as_deref(), Some("default"));
        store.remove("opencode-servers").expect("remove");
        let reopened = JsonFileStore::open(&path).expect("reopen again");
        assert!(reopened.get("opencode-servers").expect("get").is_none());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").expect("write");
        let store = JsonFileStore::open(&path).expect("open");
        assert!(store.get("anything").expect("get").is_none());
        store.set("k", json!(1)).expect("set overwrites");
        assert_eq!(JsonFileStore::open(&path).expect("reopen").get("k").expect("get"), Some(json!(1)));
    }

    #[test]
    fn type_mismatch_is_a_json_error() {
        let store = MemoryStore::new();
        store.set("n", json!("text")).expect("set");
        let err = get_json::<u32>(&store, "n").expect_err("mismatch");
        assert!(matches!(err, StoreError::Json { ref key, .. } if key == "n"));
        assert_eq!(load_or_warn::<u32>(&store, "n"), None);
    }

    #[test]
    fn unwritable_path_is_logged_not_raised() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sub = dir.path().join("sub");
        let store = JsonFileStore::open(sub.join("store.json")).expect("open");
        std::fs::write(&sub, "x").expect("block the parent dir");
        assert!(store.set("k", json!(1)).is_err());
        persist_or_warn(&store, "k", &1);
    }
}
