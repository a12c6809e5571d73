//! In-memory expiring store
//!
//! Uses DashMap for thread-safe concurrent access. Expired entries are purged
//! lazily on access, on key enumeration, and by an optional background
//! sweeper task.

use crate::error::CacheResult;
use crate::options::ExpirationPolicy;
use crate::traits::{EvictionCallback, EvictionCause, ExpiringStore};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

struct StoredEntry<V> {
    value: V,
    deadline: Option<Instant>,
    sliding: Option<Duration>,
    last_access: Instant,
    on_evicted: Option<EvictionCallback>,
}

impl<V> StoredEntry<V> {
    fn new(
        value: V,
        expiration: &ExpirationPolicy,
        now: Instant,
        on_evicted: EvictionCallback,
    ) -> Self {
        Self {
            value,
            deadline: expiration.absolute_deadline(now),
            sliding: expiration.sliding_expiration,
            last_access: now,
            on_evicted: Some(on_evicted),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
            || self
                .sliding
                .is_some_and(|idle| now.saturating_duration_since(self.last_access) >= idle)
    }

    fn notify(mut self, key: &str, cause: EvictionCause) {
        if let Some(callback) = self.on_evicted.take() {
            callback(key, cause);
        }
    }
}

/// In-memory expiring store
pub struct MemoryStore<V> {
    entries: DashMap<String, StoredEntry<V>>,
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new in-memory store
    pub fn new() -> Self {
        debug!("Creating new in-memory expiring store");
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, firing its eviction callback.
    ///
    /// Returns the number of entries purged.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|key| self.purge_if_expired(key, now))
            .count()
    }

    /// Spawn a task that calls [`purge_expired`](Self::purge_expired) every
    /// `period`.
    ///
    /// The task holds a weak reference and exits once the store is dropped.
    /// Must be called from within a tokio runtime; `period` must be non-zero.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        debug!(period = ?period, "Starting expiration sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged = purged, remaining = store.len(), "Expired entries purged");
                }
            }
        })
    }

    /// Remove `key` if it is still expired at `now`. Returns whether it was removed.
    fn purge_if_expired(&self, key: &str, now: Instant) -> bool {
        match self.entries.remove_if(key, |_, entry| entry.is_expired(now)) {
            Some((key, entry)) => {
                trace!(key = %key, "Entry expired");
                entry.notify(&key, EvictionCause::Expired);
                true
            }
            None => false,
        }
    }

    /// Read a live entry, refreshing its sliding window.
    fn touch<R>(&self, key: &str, read: impl FnOnce(&V) -> R) -> Option<R> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            None => return None,
            Some(mut entry) if !entry.is_expired(now) => {
                entry.last_access = now;
                return Some(read(&entry.value));
            }
            Some(_) => {}
        }

        self.purge_if_expired(key, now);
        None
    }
}

impl<V> Default for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ExpiringStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn set(
        &self,
        key: &str,
        value: V,
        expiration: &ExpirationPolicy,
        on_evicted: EvictionCallback,
    ) -> CacheResult<()> {
        let now = Instant::now();
        let entry = StoredEntry::new(value, expiration, now, on_evicted);

        if entry.is_expired(now) {
            trace!(key = %key, "Entry expired on arrival");
            if let Some((key, previous)) = self.entries.remove(key) {
                previous.notify(&key, EvictionCause::Replaced);
            }
            entry.notify(key, EvictionCause::Expired);
            return Ok(());
        }

        trace!(key = %key, deadline = ?entry.deadline, sliding = ?entry.sliding, "Storing entry");
        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            previous.notify(key, EvictionCause::Replaced);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> CacheResult<Option<V>> {
        Ok(self.touch(key, V::clone))
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        if let Some((key, entry)) = self.entries.remove(key) {
            trace!(key = %key, "Entry removed");
            entry.notify(&key, EvictionCause::Removed);
        }
        Ok(())
    }

    fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self.touch(key, |_| ()).is_some())
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        self.purge_expired();
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }
}
