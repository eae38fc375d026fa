//! Network reachability signal and the drain trigger built on it.
//!
//! The queue has no network knowledge of its own; it observes connectivity
//! through the [`Reachability`] trait. The host app typically feeds a
//! `tokio::sync::watch` channel from its platform reachability observer
//! and hands the receiver to both [`WatchReachability`] (for the queue's
//! drain-time checks) and [`spawn_reachability_watch`] (for the
//! connectivity-regained trigger).

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::queue::offline_queue::OfflineQueue;

/// Current-connectivity probe consulted before and during a drain.
pub trait Reachability: Send + Sync {
    /// Whether the device currently has connectivity.
    fn is_online(&self) -> bool;
}

/// Reachability that always reports online; for tests and hosts that
/// prefer to let the executor discover connectivity failures itself.
pub struct AlwaysOnline;

impl Reachability for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Adapter reading the latest value of a `watch` channel.
pub struct WatchReachability {
    rx: watch::Receiver<bool>,
}

impl WatchReachability {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }
}

impl Reachability for WatchReachability {
    fn is_online(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Spawn the background task that drains the queue on connectivity events.
///
/// Drains once at startup if already online, then again on every
/// transition to online. No polling: the task parks on the watch channel
/// between events. Duplicate notifications are harmless; `drain()` is
/// single-flight. The task ends when the sender side is dropped, which is
/// the teardown path.
pub fn spawn_reachability_watch(
    queue: Arc<OfflineQueue>,
    mut rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if *rx.borrow() {
            queue.drain().await;
        }
        loop {
            if rx.changed().await.is_err() {
                debug!("Reachability sender dropped, stopping queue watch");
                return;
            }
            if *rx.borrow() {
                info!("Connectivity regained, draining offline queue");
                queue.drain().await;
            }
        }
    })
}
