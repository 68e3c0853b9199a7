//! JSON-file-backed key-value storage implementation.
//!
//! All keys live in one JSON object rewritten on every `put`. Blobs stored
//! here are caches: losing the file means re-discovering and
//! re-authenticating, never data loss.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use super::{KeyValueStore, StoreError};

/// Disk-backed store holding every key in a single JSON file.
///
/// Stored at `~/.config/tunneltrust/store.json` on Linux/macOS and
/// `%APPDATA%\tunneltrust\store.json` on Windows by default.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<HashMap<String, String>>,
}

impl FileStore {
    /// Get the default storage path.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("org", "tunneltrust", "tunneltrust")
            .ok_or(StoreError::ConfigDirUnavailable)?;
        Ok(dirs.config_dir().join("store.json"))
    }

    /// Load the store from the default location, creating parent directories
    /// if they don't exist.
    pub fn load() -> Result<Self, StoreError> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the store from a specific path.
    pub fn load_from_path(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Get the storage path for this store.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        let data = self.data.read();
        let contents = serde_json::to_string_pretty(&*data)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("keys_count", &self.data.read().len())
            .finish()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data
            .write()
            .insert(key.to_string(), value.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        let store = FileStore::load_from_path(path).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp) = test_store();
        store.put("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn test_persistence_across_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");

        {
            let store = FileStore::load_from_path(path.clone()).unwrap();
            store.put("a", "1").unwrap();
            store.put("b", "2").unwrap();
        }

        {
            let store = FileStore::load_from_path(path).unwrap();
            assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
            assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::load_from_path(temp_dir.path().join("nested/store.json")).unwrap();
        assert!(store.get("anything").unwrap().is_none());
    }
}
