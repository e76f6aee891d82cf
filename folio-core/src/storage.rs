use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::identity::DocumentIdentity;

pub const BOOKMARKS_KEY: &str = "bookmarks";
/// Reserved for host chrome state.
pub const LAYOUT_KEY: &str = "layout";

pub fn viewer_state_key(identity: &DocumentIdentity) -> String {
    format!("viewerState:{identity}")
}

/// Client-local string storage.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Stores every key in its own JSON file below `root`.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{file_name}.json"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| StorageError::Io { path, source })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.flush()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Reads and decodes `key`. Absent, unreadable and malformed values all come back as `None`.
pub fn load_json<T: DeserializeOwned>(storage: &dyn KeyValueStorage, key: &str) -> Option<T> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!(%key, error = %err, "failed to read persisted state");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(%key, error = %err, "discarding malformed persisted state");
            None
        }
    }
}

pub fn save_json<T: Serialize + ?Sized>(
    storage: &dyn KeyValueStorage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let payload = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_owned(),
        source,
    })?;
    storage.set(key, &payload)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Durable,
    /// A write failed earlier; state lives in memory until the process exits.
    SessionOnly,
}

/// Storage shared by every component that persists state.
///
/// The first failed write flips the whole store to [`Persistence::SessionOnly`] and is logged
/// once; later saves are skipped silently.
#[derive(Clone)]
pub struct PersistentStore {
    storage: Arc<dyn KeyValueStorage>,
    degraded: Arc<AtomicBool>,
}

impl PersistentStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        load_json(self.storage.as_ref(), key)
    }

    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Persistence {
        if self.degraded.load(Ordering::Relaxed) {
            return Persistence::SessionOnly;
        }
        match save_json(self.storage.as_ref(), key, value) {
            Ok(()) => {
                debug!(%key, "persisted state");
                Persistence::Durable
            }
            Err(err) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!(%key, error = %err, "storage unavailable, keeping state for this session only");
                }
                Persistence::SessionOnly
            }
        }
    }

    pub fn persistence(&self) -> Persistence {
        if self.degraded.load(Ordering::Relaxed) {
            Persistence::SessionOnly
        } else {
            Persistence::Durable
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::UnavailableStorage;
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        page: usize,
    }

    #[test]
    fn file_storage_round_trips_values() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("state")).unwrap();

        save_json(&storage, "viewerState:abc", &Sample { page: 7 }).unwrap();
        let restored: Option<Sample> = load_json(&storage, "viewerState:abc");

        assert_eq!(restored, Some(Sample { page: 7 }));
        assert!(dir.path().join("state/viewerState_abc.json").exists());
    }

    #[test]
    fn malformed_json_is_treated_as_absent() {
        let storage = MemoryStorage::new();
        storage.set(BOOKMARKS_KEY, "{not json").unwrap();

        let restored: Option<Sample> = load_json(&storage, BOOKMARKS_KEY);
        assert!(restored.is_none());
    }

    #[test]
    fn failed_write_degrades_to_session_only_once() {
        let backing = Arc::new(UnavailableStorage::default());
        let store = PersistentStore::new(backing.clone());

        assert_eq!(store.save("a", &1), Persistence::SessionOnly);
        assert_eq!(store.save("b", &2), Persistence::SessionOnly);
        assert_eq!(store.persistence(), Persistence::SessionOnly);
        assert_eq!(backing.attempts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn clones_share_the_degraded_flag() {
        let store = PersistentStore::new(Arc::new(UnavailableStorage::default()));
        let clone = store.clone();

        store.save("a", &1);
        assert_eq!(clone.persistence(), Persistence::SessionOnly);
    }
}
