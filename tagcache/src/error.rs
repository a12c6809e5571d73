//! Error types for cache operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// A missing key is never an error: lookups return `Ok(None)` and deletes of
/// absent keys succeed.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Waiting for a per-key lock exceeded the configured timeout
    #[error("Timed out after {waited:?} waiting for lock on key: {key}")]
    LockTimeout {
        /// Key whose lock could not be acquired
        key: String,
        /// How long the caller waited
        waited: Duration,
    },

    /// Fault reported by the underlying expiring store
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Create a new store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error is a lock timeout
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
