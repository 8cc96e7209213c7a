//! Durable conversation log
//!
//! The whole history lives under one key as a JSON array. Appends are a
//! read-modify-write of that array, so callers must keep to a single writer.

use super::types::Message;
use crate::{MurmurError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key the conversation log is stored under
pub const HISTORY_KEY: &str = "conversation_history";

/// Minimal string key-value storage backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MurmurError::StorageFailure(format!(
                "Failed to read {}: {}",
                key, e
            ))),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            MurmurError::StorageFailure(format!("Failed to create {:?}: {}", self.dir, e))
        })?;

        // Write to a sibling file first so a crash never leaves half an array
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| MurmurError::StorageFailure(format!("Failed to write {}: {}", key, e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MurmurError::StorageFailure(format!("Failed to commit {}: {}", key, e)))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MurmurError::StorageFailure(format!(
                "Failed to remove {}: {}",
                key, e
            ))),
        }
    }
}

/// Volatile store, used when persistence is disabled and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw access to a stored value
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: impl Into<String>) {
        self.entries.lock().insert(key.to_string(), value.into());
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Ordered message log on top of a [`KeyValueStore`].
#[derive(Clone)]
pub struct PersistenceStore {
    backend: Arc<dyn KeyValueStore>,
}

impl PersistenceStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Append one message to the stored log.
    ///
    /// A corrupt stored value is replaced by a log holding only `message`.
    pub async fn append(&self, message: &Message) -> Result<()> {
        let mut history = self.read_all().await;
        history.push(message.clone());

        let encoded = serde_json::to_string(&history)
            .map_err(|e| MurmurError::StorageFailure(format!("Failed to encode history: {}", e)))?;
        self.backend.set(HISTORY_KEY, encoded).await?;

        debug!("Persisted message {} ({} total)", message.id, history.len());
        Ok(())
    }

    /// Full history, or the error that prevented reading it.
    pub async fn try_read_all(&self) -> Result<Vec<Message>> {
        let Some(raw) = self.backend.get(HISTORY_KEY).await? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&raw)
            .map_err(|e| MurmurError::StorageFailure(format!("Corrupt history entry: {}", e)))
    }

    /// Full history; missing or unreadable state reads as empty.
    pub async fn read_all(&self) -> Vec<Message> {
        match self.try_read_all().await {
            Ok(history) => history,
            Err(e) => {
                warn!("Treating stored history as empty: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.remove(HISTORY_KEY).await
    }
}
