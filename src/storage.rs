//! Key-value persistence boundary.
//!
//! The repository is the sole owner of the schema behind these keys. Every
//! value is a JSON document except the selected-home pointer, which is stored
//! as a raw string.

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// Keys shared with the browser front-end.
pub mod keys {
    pub const DEVICES: &str = "smartHomeDevices";
    pub const AREAS: &str = "smartHomeAreas";
    pub const FLOORS: &str = "smartHomeFloors";
    pub const SETTINGS: &str = "smartHomeSettings";
    pub const HOMES: &str = "smartHomeHomes";
    pub const SELECTED_HOME: &str = "smartHomeSelectedHome";
}

#[derive(Debug)]
pub enum StorageError {
    Io { path: PathBuf, source: io::Error },
    /// A stored value could not be decoded; `source` names the failing path.
    Corrupt {
        key: String,
        source: serde_path_to_error::Error<serde_json::Error>,
    },
    Encode { key: String, source: serde_json::Error },
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io { path, source } => write!(f, "storage io error on {}: {}", path.display(), source),
            StorageError::Corrupt { key, source } => {
                write!(f, "stored value for {} is invalid at {}: {}", key, source.path(), source.inner())
            }
            StorageError::Encode { key, source } => write!(f, "failed to encode {}: {}", key, source),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io { source, .. } => Some(source),
            StorageError::Corrupt { source, .. } => Some(source),
            StorageError::Encode { source, .. } => Some(source),
        }
    }
}

/// A string key-value store, the shape of browser local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError>;

    /// Write several keys as one unit. The default writes them one by one.
    fn set_many(&mut self, entries: Vec<(&str, String)>) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}

/// Read a JSON value; an absent key yields `None`.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    let de = &mut serde_json::Deserializer::from_str(&raw);
    serde_path_to_error::deserialize(de)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            key: key.to_string(),
            source,
        })
}

pub fn encode_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })
}

pub fn set_json<T: Serialize + ?Sized>(store: &mut dyn KeyValueStore, key: &str, value: &T) -> Result<(), StorageError> {
    let raw = encode_json(key, value)?;
    debug!("Storage: writing {} ({} bytes)", key, raw.len());
    store.set(key, raw)
}

/// Volatile store; used by tests and for dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        MemoryStore {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// All keys kept in a single JSON object on disk.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous contents intact. Two processes
/// writing the same file is last-writer-wins.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open `path`, treating a missing file as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => {
                let de = &mut serde_json::Deserializer::from_str(&raw);
                serde_path_to_error::deserialize(de).map_err(|source| StorageError::Corrupt {
                    key: path.display().to_string(),
                    source,
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        debug!("Storage: opened {} ({} key(s))", path.display(), entries.len());
        Ok(JsonFileStore { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(&self.entries).map_err(|source| StorageError::Encode {
            key: self.path.display().to_string(),
            source,
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    /// One file write for the whole batch.
    fn set_many(&mut self, entries: Vec<(&str, String)>) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.entries.insert(key.to_string(), value);
        }
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_value_reports_key_and_path() {
        let store = MemoryStore::with_entries([(keys::SETTINGS, r#"{"brands":["Hue", 7]}"#)]);
        let err = get_json::<crate::models::inventory::StoredSettings>(&store, keys::SETTINGS).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(keys::SETTINGS), "{message}");
        assert!(message.contains("brands[1]"), "{message}");
    }

    #[test]
    fn absent_key_is_none() {
        let store = MemoryStore::new();
        let floors: Option<Vec<String>> = get_json(&store, keys::FLOORS).unwrap();
        assert!(floors.is_none());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("planner.json");

        let mut store = JsonFileStore::open(&path).expect("open empty");
        store.set(keys::SELECTED_HOME, "home-1".to_string()).unwrap();
        set_json(&mut store, keys::HOMES, &vec!["a", "b"]).unwrap();

        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(reopened.get(keys::SELECTED_HOME).unwrap().as_deref(), Some("home-1"));
        let homes: Vec<String> = get_json(&reopened, keys::HOMES).unwrap().unwrap();
        assert_eq!(homes, vec!["a", "b"]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn file_store_batch_lands_in_one_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("planner.json");
        let mut store = JsonFileStore::open(&path).expect("open empty");
        store
            .set_many(vec![
                (keys::HOMES, r#"[{"id":"h1","name":"Flat"}]"#.to_string()),
                (keys::SELECTED_HOME, "h1".to_string()),
            ])
            .unwrap();

        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(reopened.get(keys::SELECTED_HOME).unwrap().as_deref(), Some("h1"));
        assert!(reopened.get(keys::HOMES).unwrap().unwrap().contains("Flat"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn failed_batch_leaves_the_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("planner.json");
        let mut store = JsonFileStore::open(&path).expect("open empty");
        store.set(keys::SELECTED_HOME, "h1".to_string()).unwrap();

        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(path.with_extension("tmp")).unwrap();
        let err = store
            .set_many(vec![
                (keys::HOMES, "[]".to_string()),
                (keys::SELECTED_HOME, "h2".to_string()),
            ])
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));

        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(reopened.get(keys::SELECTED_HOME).unwrap().as_deref(), Some("h1"));
        assert!(reopened.get(keys::HOMES).unwrap().is_none());
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("planner.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(StorageError::Corrupt { .. })));
    }
}
