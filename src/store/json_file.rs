//! File-backed key-value store persisting a single JSON object.
//!
//! The on-disk format is one JSON map of key→value strings, read and
//! rewritten whole on every mutation. That is acceptable at this layer's
//! scale (tens of small records) and keeps the store portable. A corrupt
//! file is logged and treated as empty so a bad shutdown never bricks the
//! cache or queue.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{RepliqError, Result};
use crate::store::KeyValueStore;

/// Durable store writing all keys to a single JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles so concurrent sets cannot
    // interleave and drop each other's keys.
    io_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store backed by the given file. The file is created on
    /// first write; its parent directory is created as needed.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            io_lock: Mutex::new(()),
        }
    }

    /// Default location under the platform data directory, e.g.
    /// `~/.local/share/<app>/resilience.json` on Linux.
    pub fn default_path(app: &str) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(app)
            .join("resilience.json")
    }

    async fn load_map(&self) -> HashMap<String, String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Store file is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read store file, starting empty");
                HashMap::new()
            }
        }
    }

    async fn save_map(&self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RepliqError::Store(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }
        let data = serde_json::to_string(map)?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| RepliqError::Store(format!("Failed to write {:?}: {}", self.path, e)))
    }

    /// The file this store writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.io_lock.lock().await;
        Ok(self.load_map().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut map = self.load_map().await;
        map.insert(key.to_string(), value.to_string());
        self.save_map(&map).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut map = self.load_map().await;
        if map.remove(key).is_some() {
            self.save_map(&map).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut map = self.load_map().await;
        let mut changed = false;
        for key in keys {
            changed |= map.remove(key).is_some();
        }
        if changed {
            self.save_map(&map).await?;
        }
        Ok(())
    }
}
