//! Expiring store trait definition.

use crate::error::CacheResult;
use crate::options::ExpirationPolicy;
use std::fmt;

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionCause {
    /// Explicitly removed
    Removed,
    /// Its expiration policy elapsed
    Expired,
    /// Overwritten by a newer value for the same key
    Replaced,
}

impl fmt::Display for EvictionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionCause::Removed => write!(f, "removed"),
            EvictionCause::Expired => write!(f, "expired"),
            EvictionCause::Replaced => write!(f, "replaced"),
        }
    }
}

/// Cleanup closure owned by a single stored entry.
///
/// Receives the entry's key and the reason it was evicted.
pub type EvictionCallback = Box<dyn FnOnce(&str, EvictionCause) + Send + Sync>;

/// Host capability holding entries and applying their expiration.
///
/// Implementations must be internally thread-safe. The cache never assumes
/// it can take a consistent snapshot across several calls.
pub trait ExpiringStore<V>: Send + Sync {
    /// Insert or replace an entry.
    ///
    /// `on_evicted` belongs to this entry alone and must be invoked exactly
    /// once when the entry leaves the store for any reason, including being
    /// replaced by a later `set` for the same key. It must not be invoked
    /// while the store holds internal locks.
    fn set(
        &self,
        key: &str,
        value: V,
        expiration: &ExpirationPolicy,
        on_evicted: EvictionCallback,
    ) -> CacheResult<()>;

    /// Look up a live entry.
    ///
    /// Returns `Ok(None)` if the key is missing or expired.
    fn get(&self, key: &str) -> CacheResult<Option<V>>;

    /// Remove an entry. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> CacheResult<()>;

    /// Check if a live entry exists.
    fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Snapshot of the live keys, in no particular order.
    fn keys(&self) -> CacheResult<Vec<String>>;
}
