//! Crate-wide error type and `Result` alias.

use thiserror::Error;

/// Errors surfaced by the resilience layer.
///
/// Read-path failures in the cache and queue are deliberately absorbed
/// (degraded to a miss / empty state) rather than surfaced here; only
/// operations the caller initiates directly — `store`, `enqueue`, explicit
/// clears — propagate errors.
#[derive(Debug, Error)]
pub enum RepliqError {
    /// The persistent key-value store rejected a read or write.
    #[error("Store error: {0}")]
    Store(String),

    /// A record could not be serialized for persistence.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RepliqError>;
