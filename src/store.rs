// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Key/value persistence port for profiles, preferences and scan history

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::{CuratorError, Result};

pub const PROFILES_KEY: &str = "scan_profiles";
pub const HISTORY_KEY: &str = "scan_history";
pub const THEME_KEY: &str = "theme";

/// Durable key/value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Read and deserialize a key
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and write a key
pub fn save<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?)
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| CuratorError::Persistence("store lock poisoned".to_string()))
}

/// All keys in one JSON object on disk, rewritten atomically on each `set`
pub struct JsonFileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            guard: Mutex::new(()),
        };
        // Surface a corrupt file at startup rather than on first use
        store.read_map()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(CuratorError::Persistence(format!(
                "{:?} does not hold a JSON object",
                self.path
            ))),
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(map)?.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = lock(&self.guard)?;
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = lock(&self.guard)?;
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value);
        self.write_map(&map)?;
        debug!("Persisted key '{}' to {:?}", key, self.path);
        Ok(())
    }
}

/// Volatile store for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.map)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        lock(&self.map)?.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_persists_across_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/store.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("missing").unwrap(), None);
        save(&store, "numbers", &vec![1, 2, 3]).unwrap();
        save(&store, THEME_KEY, "dark").unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let numbers: Vec<i32> = load(&reopened, "numbers").unwrap().unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);
        let theme: String = load(&reopened, THEME_KEY).unwrap().unwrap();
        assert_eq!(theme, "dark");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_non_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(CuratorError::Persistence(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.set("k", Value::from(7)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(Value::from(7)));
        assert!(load::<u32>(&store, "absent").unwrap().is_none());
    }
}
