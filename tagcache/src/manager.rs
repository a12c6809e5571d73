//! Cache manager: expiring store plus tag index.

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::invalidation::TagIndex;
use crate::lock::{KeyLockRegistry, WriteLocks};
use crate::memory::MemoryStore;
use crate::options::EntryOptions;
use crate::traits::ExpiringStore;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Removals between cooperative yields in the async bulk operations.
const YIELD_EVERY: usize = 256;

/// High-level cache with tag-based invalidation.
///
/// Every instance owns its tag index and key locks; independent managers
/// never observe each other's tags.
///
/// # Concurrency
///
/// Only [`get_or_add`](Self::get_or_add) and its variants are serialized per
/// key. `add` and `delete` called directly are not ordered against a
/// population running for the same key: a direct `delete` may land before the
/// populated value is written, and a direct `add` may be overwritten by it.
///
/// # Examples
///
/// ```
/// use tagcache::{CacheManager, EntryOptions};
///
/// # fn main() -> tagcache::CacheResult<()> {
/// let cache = CacheManager::<String>::new();
/// cache.add(
///     "user:123",
///     r#"{"name":"Alice"}"#.to_string(),
///     &EntryOptions::new().with_tags(["users", "active-users"]),
/// )?;
///
/// // Invalidate all entries with the "users" tag
/// cache.evict_by_tag("users")?;
/// assert_eq!(cache.get("user:123")?, None);
/// # Ok(())
/// # }
/// ```
pub struct CacheManager<V, S = MemoryStore<V>> {
    pub(crate) store: Arc<S>,
    pub(crate) tags: Arc<TagIndex>,
    pub(crate) locks: KeyLockRegistry,
    writes: WriteLocks,
    pub(crate) config: CacheConfig,
    sweeper: Option<JoinHandle<()>>,
    _value: PhantomData<fn() -> V>,
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache backed by a fresh [`MemoryStore`] with default configuration.
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    /// Create a cache backed by a fresh [`MemoryStore`].
    ///
    /// The expiration sweeper is started only when a tokio runtime is
    /// available; otherwise expired entries are purged on access.
    pub fn from_config(config: CacheConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sweeper = match (config.sweep_interval, tokio::runtime::Handle::try_current()) {
            (Some(period), Ok(_)) if !period.is_zero() => Some(store.spawn_sweeper(period)),
            (Some(_), Err(_)) => {
                debug!("No tokio runtime available; expiration sweeper not started");
                None
            }
            _ => None,
        };

        let mut manager = Self::with_store(store, config);
        manager.sweeper = sweeper;
        manager
    }
}

impl<V> Default for CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, S> CacheManager<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: ExpiringStore<V>,
{
    /// Create a cache over an existing store.
    pub fn with_store(store: Arc<S>, config: CacheConfig) -> Self {
        Self {
            store,
            tags: Arc::new(TagIndex::new()),
            locks: KeyLockRegistry::new(),
            writes: WriteLocks::new(),
            config,
            sweeper: None,
            _value: PhantomData,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or replace an entry.
    ///
    /// Passing `None` is a no-op. Replacing an entry replaces its value,
    /// expiration and tags; tags do not accumulate across writes.
    ///
    /// Concurrent writes to one key are applied one at a time, so the tags in
    /// the index always belong to the write that is live in the store.
    pub fn add(
        &self,
        key: &str,
        value: impl Into<Option<V>>,
        options: &EntryOptions,
    ) -> CacheResult<()> {
        let Some(value) = value.into() else {
            trace!(key = %key, "Ignoring add without a value");
            return Ok(());
        };

        let expiration = options
            .expiration
            .as_ref()
            .unwrap_or(&self.config.default_expiration);

        let _write = self.writes.lock(key);
        // Tag first so an entry evicted the moment it lands still finds its buckets
        let repair = self.tags.associate(key, options.tags.iter().cloned());
        let written = self
            .store
            .set(key, value, expiration, repair.clone().into_callback());
        if let Err(err) = written {
            repair.run();
            return Err(err);
        }

        trace!(key = %key, tags = options.tags.len(), "Entry added");
        Ok(())
    }

    /// Async counterpart of [`add`](Self::add).
    pub async fn add_async(
        &self,
        key: &str,
        value: impl Into<Option<V>>,
        options: &EntryOptions,
    ) -> CacheResult<()> {
        self.add(key, value, options)
    }

    /// Get a value from the cache.
    pub fn get(&self, key: &str) -> CacheResult<Option<V>> {
        self.store.get(key)
    }

    /// Async counterpart of [`get`](Self::get).
    pub async fn get_async(&self, key: &str) -> CacheResult<Option<V>> {
        self.get(key)
    }

    /// Delete a specific key. Its tags are cleaned up by the eviction callback.
    pub fn delete(&self, key: &str) -> CacheResult<()> {
        self.store.remove(key)
    }

    /// Async counterpart of [`delete`](Self::delete).
    pub async fn delete_async(&self, key: &str) -> CacheResult<()> {
        self.delete(key)
    }

    /// Check if a key exists.
    pub fn has_key(&self, key: &str) -> CacheResult<bool> {
        self.store.contains(key)
    }

    /// Async counterpart of [`has_key`](Self::has_key).
    pub async fn has_key_async(&self, key: &str) -> CacheResult<bool> {
        self.has_key(key)
    }

    /// Delete every entry tagged with `tag`.
    ///
    /// Returns the number of keys deleted. An unknown tag deletes nothing.
    /// A store fault does not stop the sweep; the first one is returned once
    /// every key has been attempted.
    pub fn evict_by_tag(&self, tag: &str) -> CacheResult<usize> {
        let keys = self.tags.evict(tag);
        if keys.is_empty() {
            return Ok(0);
        }

        debug!(tag = %tag, count = keys.len(), "Evicting tagged entries");
        let mut first_err = None;
        for key in &keys {
            if let Err(err) = self.store.remove(key) {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(keys.len()),
        }
    }

    /// Async counterpart of [`evict_by_tag`](Self::evict_by_tag), yielding
    /// periodically on large tags.
    pub async fn evict_by_tag_async(&self, tag: &str) -> CacheResult<usize> {
        let keys = self.tags.evict(tag);
        if keys.is_empty() {
            return Ok(0);
        }

        debug!(tag = %tag, count = keys.len(), "Evicting tagged entries");
        let mut first_err = None;
        for (i, key) in keys.iter().enumerate() {
            if let Err(err) = self.store.remove(key) {
                first_err.get_or_insert(err);
            }
            if (i + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(keys.len()),
        }
    }

    /// Delete every entry carrying any of `tags`.
    ///
    /// Returns the total number of keys deleted. Like
    /// [`evict_by_tag`](Self::evict_by_tag), every tag is attempted and the
    /// first store fault is returned afterwards.
    pub fn evict_by_tags(&self, tags: &[&str]) -> CacheResult<usize> {
        let mut evicted = 0;
        let mut first_err = None;
        for tag in tags {
            match self.evict_by_tag(tag) {
                Ok(count) => evicted += count,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(evicted),
        }
    }

    /// Live keys, in no particular order.
    pub fn get_all_keys(&self) -> CacheResult<impl Iterator<Item = String> + use<V, S>> {
        Ok(self.store.keys()?.into_iter())
    }

    /// Live keys accepted by `filter`, in no particular order.
    ///
    /// The filter runs lazily as the iterator is consumed.
    pub fn get_keys_matching<P>(
        &self,
        filter: P,
    ) -> CacheResult<impl Iterator<Item = String> + use<V, S, P>>
    where
        P: Fn(&str) -> bool,
    {
        Ok(self.store.keys()?.into_iter().filter(move |key| filter(key)))
    }

    /// Async counterpart of [`get_all_keys`](Self::get_all_keys).
    pub async fn get_all_keys_async(&self) -> CacheResult<Vec<String>> {
        self.store.keys()
    }

    /// Async counterpart of [`get_keys_matching`](Self::get_keys_matching).
    pub async fn get_keys_matching_async<P>(&self, filter: P) -> CacheResult<Vec<String>>
    where
        P: Fn(&str) -> bool,
    {
        Ok(self.get_keys_matching(filter)?.collect())
    }

    /// Delete every entry and drop the whole tag index.
    ///
    /// Entries written while the sweep runs may lose their tags.
    pub fn delete_all(&self) -> CacheResult<()> {
        let keys = self.store.keys()?;
        debug!(count = keys.len(), "Deleting all entries");
        for key in &keys {
            self.store.remove(key)?;
        }
        self.tags.clear();
        Ok(())
    }

    /// Delete every entry whose key matches `filter`, then drop matching keys
    /// from every tag bucket.
    pub fn delete_all_matching<P>(&self, filter: P) -> CacheResult<()>
    where
        P: Fn(&str) -> bool,
    {
        let keys: Vec<String> = self.store.keys()?.into_iter().filter(|key| filter(key)).collect();
        debug!(count = keys.len(), "Deleting matching entries");
        for key in &keys {
            self.store.remove(key)?;
        }
        self.tags.clear_matching(filter);
        Ok(())
    }

    /// Async counterpart of [`delete_all`](Self::delete_all), yielding
    /// periodically on large caches.
    pub async fn delete_all_async(&self) -> CacheResult<()> {
        self.delete_keys_async(self.store.keys()?).await?;
        self.tags.clear();
        Ok(())
    }

    /// Async counterpart of [`delete_all_matching`](Self::delete_all_matching).
    pub async fn delete_all_matching_async<P>(&self, filter: P) -> CacheResult<()>
    where
        P: Fn(&str) -> bool,
    {
        let keys: Vec<String> = self.store.keys()?.into_iter().filter(|key| filter(key)).collect();
        self.delete_keys_async(keys).await?;
        self.tags.clear_matching(filter);
        Ok(())
    }

    /// Get all keys with a specific tag
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tags.keys_for_tag(tag)
    }

    /// Get all registered tags
    pub fn tags(&self) -> Vec<String> {
        self.tags.tags()
    }

    /// Number of registered tags
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Number of keys with a population lock held or awaited
    pub fn pending_locks(&self) -> usize {
        self.locks.len()
    }

    async fn delete_keys_async(&self, keys: Vec<String>) -> CacheResult<()> {
        debug!(count = keys.len(), "Deleting entries");
        for (i, key) in keys.iter().enumerate() {
            self.store.remove(key)?;
            if (i + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }
}

impl<V, S> Drop for CacheManager<V, S> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
