//! Local key-value persistence for analyst state.
//!
//! Keys map to JSON documents. This is the only persistence the client owns;
//! the pricing backend stays authoritative for everything else.

pub mod file;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

pub use file::FileStore;

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
    InvalidKey(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "storage I/O error: {e}"),
            StorageError::Serialize(e) => write!(f, "storage serialization error: {e}"),
            StorageError::InvalidKey(key) => write!(f, "invalid storage key: '{key}'"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Serialize(e) => Some(e),
            StorageError::InvalidKey(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialize(e)
    }
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Reads `key` as `T`. Missing, unreadable or corrupt entries yield `None`
/// so callers fall back to defaults.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to read persisted state");
            return None;
        }
    };

    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding corrupt persisted state");
            None
        }
    }
}

/// Writes `value` under `key`; failures are logged, never fatal for the UI state.
pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let result = serde_json::to_string(value)
        .map_err(StorageError::from)
        .and_then(|raw| store.set(key, &raw));
    if let Err(err) = result {
        tracing::error!(key, error = %err, "failed to persist state");
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        width: u32,
    }

    #[test]
    fn json_helpers_round_trip_and_tolerate_corruption() {
        let store = MemoryStore::new();
        assert_eq!(load_json::<Prefs>(&store, "prefs"), None);

        save_json(&store, "prefs", &Prefs { width: 320 });
        assert_eq!(load_json::<Prefs>(&store, "prefs"), Some(Prefs { width: 320 }));

        store.set("prefs", "{not json").unwrap();
        assert_eq!(load_json::<Prefs>(&store, "prefs"), None);

        store.remove("prefs").unwrap();
        assert_eq!(store.get("prefs").unwrap(), None);
    }
}
