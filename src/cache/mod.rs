//! AI response caching with TTL expiry, LRU eviction, and store-backed persistence.

pub mod response_cache;

pub use response_cache::{is_expired, CacheEntry, CacheStats, ResponseCache};
