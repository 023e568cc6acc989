//! Key-value persistence for credentials, site settings and chat history.
//!
//! Values are JSON so callers can store strings, numbers and whole message
//! lists under one key, the way a browser extension's local storage behaves.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use shared::error::ChatError;
use std::fs;
use std::path::{Path, PathBuf};

pub type Entries = Map<String, Value>;

pub trait KeyValueStore: Send + Sync {
    /// Returns only the keys that are present.
    fn get(&self, keys: &[&str]) -> Result<Entries, ChatError>;
    fn set(&self, entries: Entries) -> Result<(), ChatError>;
    fn remove(&self, keys: &[&str]) -> Result<(), ChatError>;
    /// All stored keys, for prefix sweeps such as clearing every host's history.
    fn keys(&self) -> Result<Vec<String>, ChatError>;
}

fn pick(all: &Entries, keys: &[&str]) -> Entries {
    keys.iter()
        .filter_map(|k| all.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// In-process store, used by tests and one-shot commands.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Entries, ChatError> {
        Ok(pick(&self.entries.lock(), keys))
    }

    fn set(&self, entries: Entries) -> Result<(), ChatError> {
        self.entries.lock().extend(entries);
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), ChatError> {
        let mut all = self.entries.lock();
        for key in keys {
            all.remove(*key);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, ChatError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

/// One JSON object on disk. Every write replaces the file through a rename so
/// a crash never leaves a half-written store behind.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl JsonFileStore {
    /// Store under the platform config directory.
    pub fn open_default() -> Result<Self, ChatError> {
        Self::open(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("app", "Wally", "Wally")
            .map(|p| p.config_dir().join("storage.json"))
            .unwrap_or_else(|| PathBuf::from("./wally-storage.json"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ChatError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Entries::new(),
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        path = %path.display(),
                        "store file is not a JSON object, starting empty"
                    );
                    Entries::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
            Err(e) => return Err(io_error(&path, e)),
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &Entries) -> Result<(), ChatError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
            }
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| ChatError::Store(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ChatError {
    ChatError::Store(format!("{}: {}", path.display(), e))
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, keys: &[&str]) -> Result<Entries, ChatError> {
        Ok(pick(&self.entries.lock(), keys))
    }

    fn set(&self, entries: Entries) -> Result<(), ChatError> {
        let mut all = self.entries.lock();
        let mut next = all.clone();
        next.extend(entries);
        self.flush(&next)?;
        *all = next;
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), ChatError> {
        let mut all = self.entries.lock();
        let mut next = all.clone();
        for key in keys {
            next.remove(*key);
        }
        self.flush(&next)?;
        *all = next;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, ChatError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

/// Reads a non-empty string value.
pub fn string_value(entries: &Entries, key: &str) -> Option<String> {
    entries
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn entries(value: Value) -> Entries {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_memory_store_get_set_remove() {
        let store = MemoryStore::new();
        store.set(entries(json!({"a": 1, "b": "two"}))).unwrap();
        let got = store.get(&["a", "missing"]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["a"], 1);

        store.remove(&["a"]).unwrap();
        assert!(store.get(&["a"]).unwrap().is_empty());
        assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let store = JsonFileStore::open(&path).unwrap();
        store
            .set(entries(json!({"wallyApiKey": "k", "tokenExpiresAt": 42})))
            .unwrap();
        store.remove(&["tokenExpiresAt"]).unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        let got = reopened.get(&["wallyApiKey", "tokenExpiresAt"]).unwrap();
        assert_eq!(got.get("wallyApiKey"), Some(&json!("k")));
        assert!(!got.contains_key("tokenExpiresAt"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_tolerates_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_string_value_skips_empty() {
        let map = entries(json!({"a": "", "b": "x", "c": 3}));
        assert_eq!(string_value(&map, "a"), None);
        assert_eq!(string_value(&map, "b").as_deref(), Some("x"));
        assert_eq!(string_value(&map, "c"), None);
    }
}
