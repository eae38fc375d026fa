//! The durable offline queue and its drain state machine.
//!
//! Requests that could not be completed immediately are appended here and
//! replayed, oldest first, once connectivity returns. Per item the state
//! machine is Queued → (executing) → Completed | Queued-with-incremented-
//! retry | Dropped. A failing item yields its head position to the tail
//! (round-robin retry) so it cannot block the items behind it.
//!
//! The full queue state is persisted under `offline_queue:state` after
//! every mutation, so an app shutdown mid-drain loses no progress.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::queue::reachability::Reachability;
use crate::queue::request::{QueuedRequest, RequestKind};
use crate::store::KeyValueStore;

const STATE_KEY: &str = "offline_queue:state";

/// Caller-injected function that performs the actual AI request.
///
/// `true` means success (the item is dequeued); `false` means retryable
/// failure. The queue treats all failures identically; an executor that
/// wants different handling for rejections versus connectivity must
/// distinguish them upstream.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &QueuedRequest) -> bool;
}

/// Result of one `drain()` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Items completed successfully.
    pub processed: usize,
    /// Items permanently dropped after exhausting retries.
    pub failed: usize,
}

/// State pushed to subscribers on every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Items currently queued.
    pub pending: usize,
    /// Whether a drain loop is running.
    pub is_processing: bool,
    /// Unix timestamp of the last completed drain, if any.
    pub last_processed: Option<i64>,
}

/// Aggregate queue statistics.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Items currently queued.
    pub pending: usize,
    /// Enqueue timestamp of the oldest queued item.
    pub oldest_timestamp: Option<i64>,
    /// Queued item counts keyed by request kind.
    pub counts_by_kind: HashMap<RequestKind, usize>,
}

type Listener = Box<dyn Fn(QueueSnapshot) + Send + Sync>;

struct QueueInner {
    items: VecDeque<QueuedRequest>,
    last_processed: Option<i64>,
}

/// On-disk representation. Items are kept as raw JSON values so one
/// malformed record can be discarded without losing the rest.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    items: Vec<Value>,
    last_processed: Option<i64>,
}

/// Durable, ordered, retrying work queue for deferred AI requests.
///
/// One instance per process, owned by the app's composition root. All
/// in-memory state sits behind a mutex with short critical sections that
/// are never held across an await; the drain loop's single-flight
/// guarantee is a separate atomic flag because a drain spans many awaits.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    reachability: Arc<dyn Reachability>,
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    is_processing: AtomicBool,
    executor: RwLock<Option<Arc<dyn RequestExecutor>>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_token: AtomicU64,
}

impl OfflineQueue {
    /// Create an empty queue over the given store and reachability signal.
    ///
    /// Call [`load`](Self::load) before use to restore persisted state.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        reachability: Arc<dyn Reachability>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            reachability,
            config,
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                last_processed: None,
            }),
            is_processing: AtomicBool::new(false),
            executor: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Inject the executor that performs the actual network requests.
    pub fn set_executor(&self, executor: Arc<dyn RequestExecutor>) {
        *self.executor.write().unwrap() = Some(executor);
    }

    /// Restore persisted state, discarding malformed records one by one.
    ///
    /// Read failures and whole-file corruption degrade to an empty queue;
    /// a queue that can fail to load is worse than one that starts over.
    pub async fn load(&self) {
        let raw = match self.store.get(STATE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read queue state, starting empty");
                return;
            }
        };
        let state: PersistedState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Queue state is corrupt, starting empty");
                return;
            }
        };

        let mut items = VecDeque::with_capacity(state.items.len());
        for value in state.items {
            match serde_json::from_value::<QueuedRequest>(value) {
                Ok(item) => items.push_back(item),
                Err(e) => warn!(error = %e, "Discarding malformed queued request"),
            }
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.items = items;
            inner.last_processed = state.last_processed;
        }
        self.notify();
    }

    /// Append a request, evicting the oldest queued item first when at
    /// capacity. Returns the new item's id.
    pub async fn enqueue(
        &self,
        kind: RequestKind,
        params: Value,
        partner_id: Option<String>,
        partner_name: Option<String>,
    ) -> Result<String> {
        let item = QueuedRequest::new(kind, params, partner_id, partner_name);
        let id = item.id.clone();
        let raw = {
            let mut inner = self.inner.lock().unwrap();
            if inner.items.len() >= self.config.max_queue_size {
                if let Some(evicted) = inner.items.pop_front() {
                    warn!(id = %evicted.id, "Queue at capacity, dropping oldest item");
                }
            }
            inner.items.push_back(item);
            serialize_state(&inner)?
        };
        self.store.set(STATE_KEY, &raw).await?;
        self.notify();
        Ok(id)
    }

    /// Remove a specific item regardless of position (user cancellation).
    /// Returns whether anything was removed.
    pub async fn dequeue_by_id(&self, id: &str) -> Result<bool> {
        let raw = {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.items.len();
            inner.items.retain(|item| item.id != id);
            if inner.items.len() == before {
                return Ok(false);
            }
            serialize_state(&inner)?
        };
        self.store.set(STATE_KEY, &raw).await?;
        self.notify();
        Ok(true)
    }

    /// Remove every queued item.
    pub async fn clear(&self) -> Result<()> {
        let raw = {
            let mut inner = self.inner.lock().unwrap();
            inner.items.clear();
            serialize_state(&inner)?
        };
        self.store.set(STATE_KEY, &raw).await?;
        self.notify();
        Ok(())
    }

    /// Aggregate statistics over the queued items.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        let mut counts_by_kind: HashMap<RequestKind, usize> = HashMap::new();
        for item in &inner.items {
            *counts_by_kind.entry(item.kind).or_default() += 1;
        }
        QueueStats {
            pending: inner.items.len(),
            oldest_timestamp: inner.items.front().map(|item| item.timestamp),
            counts_by_kind,
        }
    }

    /// Current state as pushed to subscribers.
    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock().unwrap();
        QueueSnapshot {
            pending: inner.items.len(),
            is_processing: self.is_processing.load(Ordering::SeqCst),
            last_processed: inner.last_processed,
        }
    }

    /// Register a listener, invoked synchronously on every state mutation
    /// and once immediately with the current snapshot. Returns a token for
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, listener: impl Fn(QueueSnapshot) + Send + Sync + 'static) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        listener(self.snapshot());
        self.listeners
            .lock()
            .unwrap()
            .push((token, Box::new(listener)));
        token
    }

    /// Remove a listener. Returns whether the token was registered.
    pub fn unsubscribe(&self, token: u64) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(t, _)| *t != token);
        listeners.len() != before
    }

    /// Replay queued items through the injected executor.
    ///
    /// Single-flight: a second call while one is running returns zero
    /// counts immediately, as does a call while the queue is empty, the
    /// device offline, or no executor configured. Processes the head item
    /// per iteration — success dequeues it, retryable failure moves it to
    /// the tail with `retry_count` incremented, exhausted retries drop it
    /// permanently — persisting and notifying after every item, pacing
    /// iterations by `retry_delay`, and stopping early if connectivity is
    /// lost mid-run.
    pub async fn drain(&self) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress, skipping");
            return outcome;
        }
        if self.inner.lock().unwrap().items.is_empty() {
            self.is_processing.store(false, Ordering::SeqCst);
            return outcome;
        }
        if !self.reachability.is_online() {
            debug!("Device offline, skipping drain");
            self.is_processing.store(false, Ordering::SeqCst);
            return outcome;
        }
        let executor = match self.executor.read().unwrap().clone() {
            Some(executor) => executor,
            None => {
                warn!("No executor configured, skipping drain");
                self.is_processing.store(false, Ordering::SeqCst);
                return outcome;
            }
        };

        self.notify();

        loop {
            let item = match self.inner.lock().unwrap().items.front().cloned() {
                Some(item) => item,
                None => break,
            };

            let success = executor.execute(&item).await;

            let raw = {
                let mut inner = self.inner.lock().unwrap();
                // The head may have been cancelled or cleared while the
                // executor was in flight; only account for it if it is
                // still ours.
                let head_is_ours = inner
                    .items
                    .front()
                    .map(|head| head.id == item.id)
                    .unwrap_or(false);
                if head_is_ours {
                    inner.items.pop_front();
                    if success {
                        outcome.processed += 1;
                        debug!(id = %item.id, kind = ?item.kind, "Queued request completed");
                    } else {
                        let mut retried = item.clone();
                        retried.retry_count += 1;
                        if retried.retry_count >= self.config.max_retries {
                            outcome.failed += 1;
                            warn!(
                                id = %retried.id,
                                kind = ?retried.kind,
                                retries = retried.retry_count,
                                "Dropping queued request after exhausting retries"
                            );
                        } else {
                            debug!(
                                id = %retried.id,
                                retries = retried.retry_count,
                                "Request failed, moving to tail for retry"
                            );
                            inner.items.push_back(retried);
                        }
                    }
                }
                serialize_state(&inner)
            };
            self.persist_best_effort(raw).await;
            self.notify();

            // Bind before the await so the lock guard is not held across it.
            let items_remain = !self.inner.lock().unwrap().items.is_empty();
            if items_remain {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
            if !self.reachability.is_online() {
                debug!("Connectivity lost mid-drain, leaving remaining items queued");
                break;
            }
        }

        let raw = {
            let mut inner = self.inner.lock().unwrap();
            inner.last_processed = Some(chrono::Utc::now().timestamp());
            serialize_state(&inner)
        };
        self.persist_best_effort(raw).await;
        self.is_processing.store(false, Ordering::SeqCst);
        self.notify();
        outcome
    }

    // -- private helpers ---------------------------------------------------

    /// Mid-drain persistence failures degrade with a warning; progress is
    /// still correct in memory and the next successful write catches up.
    async fn persist_best_effort(&self, raw: Result<String>) {
        match raw {
            Ok(raw) => {
                if let Err(e) = self.store.set(STATE_KEY, &raw).await {
                    warn!(error = %e, "Failed to persist queue state");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize queue state"),
        }
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener(snapshot.clone());
        }
    }
}

fn serialize_state(inner: &QueueInner) -> Result<String> {
    let items = inner
        .items
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let state = PersistedState {
        items,
        last_processed: inner.last_processed,
    };
    Ok(serde_json::to_string(&state)?)
}
