//! Caller-overridable configuration for both components.
//!
//! Every limit the layer enforces lives here so the composition root can
//! tune them; the defaults match the shipped mobile client (50 entries,
//! 7-day TTL, 50 queued requests, 3 retries, 2s pacing).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RepliqError, Result};

/// Response cache limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries before LRU eviction kicks in.
    pub max_entries: usize,
    /// Seconds after creation at which an entry is treated as absent.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Offline queue limits and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued requests; enqueue past this evicts the oldest item.
    pub max_queue_size: usize,
    /// Attempts per item before it is permanently dropped.
    pub max_retries: u32,
    /// Pause between drained items, in milliseconds.
    pub retry_delay_ms: u64,
}

impl QueueConfig {
    /// The inter-item pause as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            max_retries: 3,
            retry_delay_ms: 2_000,
        }
    }
}

/// Bundle of both components' configuration, loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
}

impl ResilienceConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| RepliqError::Store(format!("Failed to read config {:?}: {}", path, e)))?;
        Ok(serde_json::from_str(&data)?)
    }
}
