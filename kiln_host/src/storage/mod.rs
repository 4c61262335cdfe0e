//! Persistence for settings, PID gains, profiles and firing history.
//!
//! Scalar values live in one JSON map per namespace; opaque blobs are
//! files under a namespace directory. Every operation opens, reads and
//! writes in one step; nothing holds a store handle across tasks.

pub mod history;
pub mod profiles;
pub mod settings;
pub mod state;

pub use history::{FiringOutcome, HistoryRecord, HistoryStore};
pub use profiles::{ProfileStore, ProfileStoreError};

use kiln_shared::{KeyValueStore, StoreError};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Directory-backed key-value store.
#[derive(Debug)]
pub struct DirKvStore {
    root: PathBuf,
    // One writer at a time; the maps are read-modify-written whole.
    write_lock: Mutex<()>,
}

impl DirKvStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn scalars_path(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{namespace}.json"))
    }

    fn blob_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(namespace).join(key)
    }

    fn read_scalars(&self, namespace: &str) -> Map<String, Value> {
        match std::fs::read(self.scalars_path(namespace)) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(namespace, "corrupt scalar store, resetting: {}", e);
                Map::new()
            }),
            Err(_) => Map::new(),
        }
    }

    fn write_scalars(&self, namespace: &str, map: &Map<String, Value>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(map).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::write(self.scalars_path(namespace), bytes)
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    fn get_value(&self, namespace: &str, key: &str) -> Option<Value> {
        self.read_scalars(namespace).get(key).cloned()
    }

    fn set_value(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().expect("store lock poisoned");
        let mut map = self.read_scalars(namespace);
        map.insert(key.to_string(), value);
        self.write_scalars(namespace, &map)
    }
}

impl KeyValueStore for DirKvStore {
    fn get_i32(&self, namespace: &str, key: &str) -> Option<i32> {
        self.get_value(namespace, key)?.as_i64().map(|v| v as i32)
    }

    fn set_i32(&self, namespace: &str, key: &str, value: i32) -> Result<(), StoreError> {
        self.set_value(namespace, key, Value::from(value))
    }

    fn get_u32(&self, namespace: &str, key: &str) -> Option<u32> {
        self.get_value(namespace, key)?.as_u64().map(|v| v as u32)
    }

    fn set_u32(&self, namespace: &str, key: &str, value: u32) -> Result<(), StoreError> {
        self.set_value(namespace, key, Value::from(value))
    }

    fn get_u8(&self, namespace: &str, key: &str) -> Option<u8> {
        self.get_value(namespace, key)?.as_u64().map(|v| v as u8)
    }

    fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<(), StoreError> {
        self.set_value(namespace, key, Value::from(value))
    }

    fn get_string(&self, namespace: &str, key: &str) -> Option<String> {
        self.get_value(namespace, key)?
            .as_str()
            .map(|s| s.to_string())
    }

    fn set_string(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_value(namespace, key, Value::from(value))
    }

    fn get_blob(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        std::fs::read(self.blob_path(namespace, key)).ok()
    }

    fn set_blob(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().expect("store lock poisoned");
        let path = self.blob_path(namespace, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        std::fs::write(path, value).map_err(|e| StoreError::Io(e.to_string()))
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().expect("store lock poisoned");
        let mut map = self.read_scalars(namespace);
        if map.remove(key).is_some() {
            self.write_scalars(namespace, &map)?;
        }
        match std::fs::remove_file(self.blob_path(namespace, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }
}
