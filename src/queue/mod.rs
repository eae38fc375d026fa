//! Durable offline request queue with bounded retry and reachability-driven drain.

pub mod offline_queue;
pub mod reachability;
pub mod request;

pub use offline_queue::{DrainOutcome, OfflineQueue, QueueSnapshot, QueueStats, RequestExecutor};
pub use reachability::{spawn_reachability_watch, AlwaysOnline, Reachability, WatchReachability};
pub use request::{QueuedRequest, RequestKind};
