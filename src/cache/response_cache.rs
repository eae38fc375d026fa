//! Partner-scoped AI response cache with TTL expiry and LRU eviction.
//!
//! Entries are content-addressed: the key is a SHA-256 digest of
//! `(partner_id, message_hash)` where `message_hash` digests the
//! *normalized* message (trimmed, case-folded), so trivially different
//! inputs hit the same entry. Because the backing store offers point
//! lookups only, a single index record under `ai_cache:index` enumerates
//! all live entries; it is the sole source for statistics and eviction
//! candidates.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::store::KeyValueStore;

const INDEX_KEY: &str = "ai_cache:index";

fn entry_key(id: &str) -> String {
    format!("ai_cache:entry:{}", id)
}

/// A single cached AI response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Deterministic id derived from `(partner_id, message_hash)`.
    pub id: String,
    /// The conversational counterpart this response is scoped to.
    pub partner_id: String,
    /// SHA-256 of the normalized input message.
    pub message_hash: String,
    /// The AI response, stored verbatim.
    pub response: Value,
    /// Unix timestamp when the entry was created; drives TTL expiry.
    pub timestamp: i64,
    /// Number of cache hits for this entry.
    pub access_count: u32,
    /// Unix timestamp of the last hit; drives LRU ranking.
    pub last_accessed: i64,
}

/// Index record mirroring one live entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    id: String,
    partner_id: String,
    message_hash: String,
    timestamp: i64,
}

/// Aggregate statistics derived from the index alone.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of live entries.
    pub total_entries: usize,
    /// Live entry counts keyed by partner id.
    pub entries_by_partner: HashMap<String, usize>,
}

/// Returns `true` when an entry created at `timestamp` is stale at `now`.
///
/// A timestamp in the future (clock skew) is never considered expired.
pub fn is_expired(timestamp: i64, now: i64, ttl_secs: u64) -> bool {
    now.saturating_sub(timestamp) > ttl_secs as i64
}

/// Partner-scoped response cache backed by a [`KeyValueStore`].
///
/// All operations are bounded read-modify-write cycles against the store;
/// the cache carries no locking of its own and expects callers to
/// serialize access per key (writes are idempotent upserts).
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a cache over the given store.
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Normalize a raw message before hashing: trim and case-fold.
    ///
    /// User input varies trivially (casing, trailing whitespace) without
    /// semantic change; without this the hit rate collapses.
    pub fn normalize(raw_message: &str) -> String {
        raw_message.trim().to_lowercase()
    }

    /// SHA-256 digest of a normalized message.
    pub fn message_hash(normalized: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Deterministic entry id from `(partner_id, message_hash)`.
    ///
    /// Uses length-prefixed encoding to prevent separator collisions
    /// between partner ids and hashes.
    pub fn entry_id(partner_id: &str, message_hash: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update((partner_id.len() as u64).to_le_bytes());
        hasher.update(partner_id.as_bytes());
        hasher.update((message_hash.len() as u64).to_le_bytes());
        hasher.update(message_hash.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a cached response for `(partner_id, raw_message)`.
    ///
    /// Returns `None` on absence, expiry (the stale entry is purged so
    /// index statistics stay accurate), corruption (the bad record is
    /// removed), or store read failure — a cache that can fail a read is
    /// worse than one that merely under-performs. On a hit the entry's
    /// access bookkeeping is updated and persisted best-effort.
    pub async fn lookup(&self, partner_id: &str, raw_message: &str) -> Option<Value> {
        let hash = Self::message_hash(&Self::normalize(raw_message));
        let id = Self::entry_id(partner_id, &hash);

        let raw = match self.store.get(&entry_key(&id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let mut entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(id = %&id[..8], error = %e, "Corrupt cache entry, removing");
                self.remove_entry(&id).await;
                return None;
            }
        };

        let now = now_secs();
        if is_expired(entry.timestamp, now, self.config.ttl_secs) {
            debug!(id = %&id[..8], "Cache entry expired, removing");
            self.remove_entry(&id).await;
            return None;
        }

        entry.access_count = entry.access_count.saturating_add(1);
        entry.last_accessed = now;
        if let Err(e) = self.put_entry(&entry).await {
            // A failed bookkeeping write must never turn a hit into an error.
            warn!(error = %e, "Failed to persist cache hit bookkeeping");
        }
        Some(entry.response)
    }

    /// Upsert the response for `(partner_id, raw_message)`.
    ///
    /// Overwrites any existing entry for the same key, resetting its
    /// access bookkeeping, then evicts least-recently-used entries until
    /// the cache is back within `max_entries`. Write failures propagate;
    /// callers caching an in-flight result may ignore them.
    pub async fn store(&self, partner_id: &str, raw_message: &str, response: Value) -> Result<()> {
        let hash = Self::message_hash(&Self::normalize(raw_message));
        let id = Self::entry_id(partner_id, &hash);
        let now = now_secs();

        let entry = CacheEntry {
            id: id.clone(),
            partner_id: partner_id.to_string(),
            message_hash: hash.clone(),
            response,
            timestamp: now,
            access_count: 0,
            last_accessed: now,
        };
        self.put_entry(&entry).await?;

        let mut index = self.load_index().await;
        index.retain(|r| r.id != id);
        index.push(IndexRecord {
            id,
            partner_id: partner_id.to_string(),
            message_hash: hash,
            timestamp: now,
        });

        if index.len() > self.config.max_entries {
            self.evict_lru(&mut index).await?;
        }
        self.save_index(&index).await
    }

    /// Aggregate statistics, derived purely from the index.
    pub async fn stats(&self) -> CacheStats {
        let index = self.load_index().await;
        let mut entries_by_partner: HashMap<String, usize> = HashMap::new();
        for record in &index {
            *entries_by_partner.entry(record.partner_id.clone()).or_default() += 1;
        }
        CacheStats {
            total_entries: index.len(),
            entries_by_partner,
        }
    }

    /// Remove every entry and reset the index.
    pub async fn clear_all(&self) -> Result<()> {
        let index = self.load_index().await;
        let keys: Vec<String> = index.iter().map(|r| entry_key(&r.id)).collect();
        self.store.delete_many(&keys).await?;
        self.save_index(&Vec::new()).await
    }

    /// Remove only the entries scoped to `partner_id`; returns how many
    /// were removed.
    pub async fn clear_for_partner(&self, partner_id: &str) -> Result<usize> {
        let index = self.load_index().await;
        let (evicted, kept): (Vec<_>, Vec<_>) =
            index.into_iter().partition(|r| r.partner_id == partner_id);
        if evicted.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = evicted.iter().map(|r| entry_key(&r.id)).collect();
        self.store.delete_many(&keys).await?;
        self.save_index(&kept).await?;
        Ok(evicted.len())
    }

    /// Purge every entry older than the TTL, regardless of access history.
    ///
    /// Intended to run periodically (e.g. on app foreground) independent
    /// of lookups; also reclaims entries orphaned by earlier crashes.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = now_secs();
        let index = self.load_index().await;
        let (expired, kept): (Vec<_>, Vec<_>) = index
            .into_iter()
            .partition(|r| is_expired(r.timestamp, now, self.config.ttl_secs));
        if expired.is_empty() {
            return Ok(0);
        }
        debug!(count = expired.len(), "Sweeping expired cache entries");
        let keys: Vec<String> = expired.iter().map(|r| entry_key(&r.id)).collect();
        self.store.delete_many(&keys).await?;
        self.save_index(&kept).await?;
        Ok(expired.len())
    }

    // -- private helpers ---------------------------------------------------

    async fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        let raw = serde_json::to_string(entry)?;
        self.store.set(&entry_key(&entry.id), &raw).await
    }

    /// Best-effort removal of one entry and its index record, used on the
    /// lazy-expiry and corruption paths where failures degrade silently.
    async fn remove_entry(&self, id: &str) {
        if let Err(e) = self.store.delete(&entry_key(id)).await {
            warn!(error = %e, "Failed to delete cache entry");
            return;
        }
        let mut index = self.load_index().await;
        index.retain(|r| r.id != id);
        if let Err(e) = self.save_index(&index).await {
            warn!(error = %e, "Failed to update cache index after removal");
        }
    }

    /// Evict least-recently-used entries until back at `max_entries`.
    ///
    /// The index carries no access times, so candidates' `last_accessed`
    /// is read from the store at eviction time; unreadable entries rank
    /// first (they are orphans either way). Ties break on id so eviction
    /// order is deterministic within a process run.
    async fn evict_lru(&self, index: &mut Vec<IndexRecord>) -> Result<()> {
        let mut ranked: Vec<(i64, String)> = Vec::with_capacity(index.len());
        for record in index.iter() {
            let rank = match self.store.get(&entry_key(&record.id)).await {
                Ok(Some(raw)) => serde_json::from_str::<CacheEntry>(&raw)
                    .map(|e| e.last_accessed)
                    .unwrap_or(i64::MIN),
                _ => i64::MIN,
            };
            ranked.push((rank, record.id.clone()));
        }
        ranked.sort();

        let excess = index.len().saturating_sub(self.config.max_entries);
        let victims: Vec<String> = ranked.into_iter().take(excess).map(|(_, id)| id).collect();
        for id in &victims {
            debug!(id = %&id[..8], "Evicting LRU cache entry");
        }
        let keys: Vec<String> = victims.iter().map(|id| entry_key(id)).collect();
        self.store.delete_many(&keys).await?;
        index.retain(|r| !victims.contains(&r.id));
        Ok(())
    }

    async fn load_index(&self) -> Vec<IndexRecord> {
        match self.store.get(INDEX_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(index) => index,
                Err(e) => {
                    warn!(error = %e, "Cache index is corrupt, resetting");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read cache index, treating as empty");
                Vec::new()
            }
        }
    }

    async fn save_index(&self, index: &Vec<IndexRecord>) -> Result<()> {
        let raw = serde_json::to_string(index)?;
        self.store.set(INDEX_KEY, &raw).await
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepliqError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    fn test_cache(store: Arc<MemoryStore>, max_entries: usize, ttl_secs: u64) -> ResponseCache {
        ResponseCache::new(
            store,
            CacheConfig {
                max_entries,
                ttl_secs,
            },
        )
    }

    /// Rewrite a stored entry's timestamps, bypassing the public API, so
    /// tests control TTL and LRU ordering deterministically.
    async fn backdate(
        store: &MemoryStore,
        partner_id: &str,
        message: &str,
        timestamp: Option<i64>,
        last_accessed: Option<i64>,
    ) {
        let hash = ResponseCache::message_hash(&ResponseCache::normalize(message));
        let id = ResponseCache::entry_id(partner_id, &hash);
        let raw = store.get(&entry_key(&id)).await.unwrap().unwrap();
        let mut entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        if let Some(ts) = timestamp {
            entry.timestamp = ts;
        }
        if let Some(la) = last_accessed {
            entry.last_accessed = la;
        }
        store
            .set(&entry_key(&id), &serde_json::to_string(&entry).unwrap())
            .await
            .unwrap();
        // Keep the index record's timestamp in step, as store() would.
        if let Some(ts) = timestamp {
            let raw = store.get(INDEX_KEY).await.unwrap().unwrap();
            let mut index: Vec<IndexRecord> = serde_json::from_str(&raw).unwrap();
            for record in index.iter_mut().filter(|r| r.id == id) {
                record.timestamp = ts;
            }
            store
                .set(INDEX_KEY, &serde_json::to_string(&index).unwrap())
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_normalize_trims_and_casefolds() {
        assert_eq!(ResponseCache::normalize("  Hello "), "hello");
        assert_eq!(ResponseCache::normalize("HEY"), "hey");
    }

    #[test]
    fn test_entry_id_deterministic_and_partner_scoped() {
        let hash = ResponseCache::message_hash("hello");
        assert_eq!(
            ResponseCache::entry_id("p1", &hash),
            ResponseCache::entry_id("p1", &hash)
        );
        assert_ne!(
            ResponseCache::entry_id("p1", &hash),
            ResponseCache::entry_id("p2", &hash)
        );
    }

    #[test]
    fn test_is_expired() {
        assert!(!is_expired(100, 100 + 3599, 3600));
        assert!(is_expired(100, 100 + 3601, 3600));
        // Future timestamps never expire
        assert!(!is_expired(1000, 100, 3600));
    }

    #[tokio::test]
    async fn test_lookup_hits_across_normalization_variants() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(store, 50, 3600);
        cache
            .store("p1", "Hello", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(
            cache.lookup("p1", "Hello").await,
            Some(json!({"text": "hi"}))
        );
        assert_eq!(
            cache.lookup("p1", "  hello  ").await,
            Some(json!({"text": "hi"}))
        );
        assert!(cache.lookup("p2", "Hello").await.is_none());
    }

    #[tokio::test]
    async fn test_hit_increments_access_count() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(Arc::clone(&store), 50, 3600);
        cache.store("p1", "hey", json!({"text": "hi"})).await.unwrap();
        assert_eq!(cache.lookup("p1", "HEY").await, Some(json!({"text": "hi"})));

        let hash = ResponseCache::message_hash("hey");
        let id = ResponseCache::entry_id("p1", &hash);
        let raw = store.get(&entry_key(&id)).await.unwrap().unwrap();
        let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.access_count, 1);
    }

    #[tokio::test]
    async fn test_store_overwrites_and_resets_bookkeeping() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(Arc::clone(&store), 50, 3600);
        cache.store("p1", "hey", json!("v1")).await.unwrap();
        let _ = cache.lookup("p1", "hey").await;
        cache.store("p1", "hey", json!("v2")).await.unwrap();

        assert_eq!(cache.lookup("p1", "hey").await, Some(json!("v2")));
        assert_eq!(cache.stats().await.total_entries, 1, "upsert must not duplicate");

        let hash = ResponseCache::message_hash("hey");
        let id = ResponseCache::entry_id("p1", &hash);
        let raw = store.get(&entry_key(&id)).await.unwrap().unwrap();
        let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        // One lookup after the rewrite, none carried over
        assert_eq!(entry.access_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_and_purged() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(Arc::clone(&store), 50, 3600);
        cache.store("p1", "old", json!("stale")).await.unwrap();
        backdate(&store, "p1", "old", Some(now_secs() - 3601), None).await;

        assert!(cache.lookup("p1", "old").await.is_none());
        assert_eq!(cache.stats().await.total_entries, 0, "lazy expiry must purge");
    }

    #[tokio::test]
    async fn test_entry_within_ttl_is_hit() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(Arc::clone(&store), 50, 3600);
        cache.store("p1", "fresh", json!("ok")).await.unwrap();
        backdate(&store, "p1", "fresh", Some(now_secs() - 3599), None).await;
        assert_eq!(cache.lookup("p1", "fresh").await, Some(json!("ok")));
    }

    #[tokio::test]
    async fn test_lru_eviction_removes_least_recently_used() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(Arc::clone(&store), 3, 3600);
        for i in 0..3 {
            cache
                .store("p1", &format!("m{i}"), json!(i))
                .await
                .unwrap();
        }
        // m0 was never re-accessed; push the others ahead of it
        backdate(&store, "p1", "m0", None, Some(100)).await;
        backdate(&store, "p1", "m1", None, Some(500)).await;
        backdate(&store, "p1", "m2", None, Some(500)).await;

        cache.store("p1", "m3", json!(3)).await.unwrap();

        assert!(cache.lookup("p1", "m0").await.is_none(), "m0 was LRU");
        assert!(cache.lookup("p1", "m1").await.is_some());
        assert!(cache.lookup("p1", "m2").await.is_some());
        assert!(cache.lookup("p1", "m3").await.is_some());
        assert_eq!(cache.stats().await.total_entries, 3);
    }

    #[tokio::test]
    async fn test_stats_by_partner() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(store, 50, 3600);
        cache.store("p1", "a", json!(1)).await.unwrap();
        cache.store("p1", "b", json!(2)).await.unwrap();
        cache.store("p2", "c", json!(3)).await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.entries_by_partner.get("p1"), Some(&2));
        assert_eq!(stats.entries_by_partner.get("p2"), Some(&1));
    }

    #[tokio::test]
    async fn test_clear_for_partner() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(store, 50, 3600);
        cache.store("p1", "a", json!(1)).await.unwrap();
        cache.store("p1", "b", json!(2)).await.unwrap();
        cache.store("p2", "c", json!(3)).await.unwrap();

        assert_eq!(cache.clear_for_partner("p1").await.unwrap(), 2);
        assert_eq!(cache.clear_for_partner("p1").await.unwrap(), 0);
        assert!(cache.lookup("p1", "a").await.is_none());
        assert!(cache.lookup("p2", "c").await.is_some());
        assert_eq!(cache.stats().await.total_entries, 1);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(Arc::clone(&store), 50, 3600);
        cache.store("p1", "a", json!(1)).await.unwrap();
        cache.store("p2", "b", json!(2)).await.unwrap();
        cache.clear_all().await.unwrap();
        assert_eq!(cache.stats().await.total_entries, 0);
        assert!(cache.lookup("p1", "a").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_expired_ignores_access_history() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(Arc::clone(&store), 50, 3600);
        cache.store("p1", "old", json!(1)).await.unwrap();
        cache.store("p1", "new", json!(2)).await.unwrap();
        // Recently accessed but created past the TTL: still swept
        backdate(&store, "p1", "old", Some(now_secs() - 7200), Some(now_secs())).await;

        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert_eq!(cache.sweep_expired().await.unwrap(), 0);
        assert!(cache.lookup("p1", "old").await.is_none());
        assert!(cache.lookup("p1", "new").await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss_and_self_heals() {
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(Arc::clone(&store), 50, 3600);
        cache.store("p1", "msg", json!(1)).await.unwrap();

        let hash = ResponseCache::message_hash("msg");
        let id = ResponseCache::entry_id("p1", &hash);
        store.set(&entry_key(&id), "{garbage").await.unwrap();

        assert!(cache.lookup("p1", "msg").await.is_none());
        assert!(store.get(&entry_key(&id)).await.unwrap().is_none());
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    /// Store whose writes always fail; reads pass through to an inner map.
    struct WriteFailStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for WriteFailStore {
        async fn get(&self, key: &str) -> crate::error::Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, _key: &str, _value: &str) -> crate::error::Result<()> {
            Err(RepliqError::Store("persistence unavailable".into()))
        }
        async fn delete(&self, key: &str) -> crate::error::Result<()> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_store_write_failure_propagates() {
        let store = Arc::new(WriteFailStore {
            inner: MemoryStore::new(),
        });
        let cache = ResponseCache::new(store, CacheConfig::default());
        assert!(cache.store("p1", "msg", json!(1)).await.is_err());
    }

    /// Store whose reads always fail.
    struct ReadFailStore;

    #[async_trait]
    impl KeyValueStore for ReadFailStore {
        async fn get(&self, _key: &str) -> crate::error::Result<Option<String>> {
            Err(RepliqError::Store("io failure".into()))
        }
        async fn set(&self, _key: &str, _value: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_read_failure_degrades_to_miss() {
        let cache = ResponseCache::new(Arc::new(ReadFailStore), CacheConfig::default());
        assert!(cache.lookup("p1", "msg").await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 0);
    }
}
