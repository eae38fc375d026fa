//! Repliq — client-side resilience layer for AI chat applications.
//!
//! Two independent components sit between an app's UI and its remote
//! AI-completion backend:
//!
//! - [`ResponseCache`]: content-addressed memoization of
//!   `(partner, message) → AI response` with TTL expiry and LRU eviction.
//!   Consulted before issuing a network call; populated after a
//!   successful one.
//! - [`OfflineQueue`]: a durable, ordered, retrying work queue for
//!   requests made while the device is offline, drained through a
//!   caller-injected executor once connectivity returns.
//!
//! Both persist through a pluggable [`KeyValueStore`] and are constructed
//! explicitly by the host app's composition root — no global state. The
//! crate performs no network I/O of its own; the executor and the
//! reachability signal are injected.
//!
//! ```no_run
//! use std::sync::Arc;
//! use repliq::{
//!     CacheConfig, JsonFileStore, OfflineQueue, QueueConfig, ResponseCache,
//!     WatchReachability, spawn_reachability_watch,
//! };
//!
//! # async fn wire(executor: Arc<dyn repliq::RequestExecutor>) {
//! let store = Arc::new(JsonFileStore::new(JsonFileStore::default_path("myapp")));
//! let cache = ResponseCache::new(store.clone(), CacheConfig::default());
//!
//! let (_reachability_tx, reachability_rx) = tokio::sync::watch::channel(true);
//! let queue = Arc::new(OfflineQueue::new(
//!     store,
//!     Arc::new(WatchReachability::new(reachability_rx.clone())),
//!     QueueConfig::default(),
//! ));
//! queue.set_executor(executor);
//! queue.load().await;
//! spawn_reachability_watch(queue.clone(), reachability_rx);
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod queue;
pub mod store;

pub use cache::{is_expired, CacheEntry, CacheStats, ResponseCache};
pub use config::{CacheConfig, QueueConfig, ResilienceConfig};
pub use error::{RepliqError, Result};
pub use queue::{
    spawn_reachability_watch, AlwaysOnline, DrainOutcome, OfflineQueue, QueueSnapshot, QueueStats,
    QueuedRequest, Reachability, RequestExecutor, RequestKind, WatchReachability,
};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
