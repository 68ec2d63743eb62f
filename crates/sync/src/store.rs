//! Durable key-value storage beneath the persistence queue.
//!
//! The queue persists encrypted blobs only; the store never sees plaintext
//! payloads. [`FileStore`] snapshots the map to a JSON file with a
//! write-then-rename so a crash mid-flush cannot corrupt the previous
//! snapshot. [`MemoryStore`] backs tests and deployments that disable
//! persistence.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::warn;

use crate::error::{SyncError, SyncResult};

/// Injected secure durable store contract.
///
/// Values survive process restart (for the file-backed implementation) and
/// are opaque strings; the queue stores base64 encrypted containers.
pub trait DurableStore: Send + Sync {
    /// Persist `value` under `key`, replacing any existing entry.
    fn put(&self, key: &str, value: &str) -> SyncResult<()>;

    /// Fetch the value stored under `key`.
    fn get(&self, key: &str) -> SyncResult<Option<String>>;

    /// Remove the entry under `key`; missing keys are not an error.
    fn delete(&self, key: &str) -> SyncResult<()>;

    /// List all stored keys.
    fn keys(&self) -> SyncResult<Vec<String>>;
}

/// In-memory store for tests and persistence-disabled deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// True when the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    fn put(&self, key: &str, value: &str) -> SyncResult<()> {
        let mut entries =
            self.entries.write().map_err(|e| SyncError::lock("memory_store", e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let entries =
            self.entries.read().map_err(|e| SyncError::lock("memory_store", e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> SyncResult<()> {
        let mut entries =
            self.entries.write().map_err(|e| SyncError::lock("memory_store", e.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> SyncResult<Vec<String>> {
        let entries =
            self.entries.read().map_err(|e| SyncError::lock("memory_store", e.to_string()))?;
        Ok(entries.keys().cloned().collect())
    }
}

/// File-backed store persisting a JSON snapshot per mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or create) a store at `path`, loading any existing snapshot.
    pub fn open<P: Into<PathBuf>>(path: P) -> SyncResult<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| SyncError::persistence("load", e.to_string()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(SyncError::persistence("load", err.to_string())),
        };

        Ok(Self { path, entries: RwLock::new(entries) })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> SyncResult<()> {
        let serialized = serde_json::to_string(entries)
            .map_err(|e| SyncError::persistence("flush", e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serialized)
            .map_err(|e| SyncError::persistence("flush", e.to_string()))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| SyncError::persistence("flush", e.to_string()))?;
        Ok(())
    }
}

impl DurableStore for FileStore {
    fn put(&self, key: &str, value: &str) -> SyncResult<()> {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("file store lock poisoned during put");
                poisoned.into_inner()
            }
        };
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let entries =
            self.entries.read().map_err(|e| SyncError::lock("file_store", e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> SyncResult<()> {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("file store lock poisoned during delete");
                poisoned.into_inner()
            }
        };
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> SyncResult<Vec<String>> {
        let entries =
            self.entries.read().map_err(|e| SyncError::lock("file_store", e.to_string()))?;
        Ok(entries.keys().cloned().collect())
    }
}
