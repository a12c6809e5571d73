//! Single-flight population (`get_or_add`).
//!
//! For a given key, at most one factory runs at a time across blocking and
//! async callers combined. Callers queued behind it re-check the cache once
//! they hold the lock and usually find the value already there. Failures are
//! not cached: the next caller in line runs its own factory.
//!
//! A factory that never finishes holds its key's lock indefinitely. Set
//! [`CacheConfig::lock_timeout`](crate::CacheConfig::lock_timeout) to bound
//! how long async callers wait behind it.

use crate::error::CacheError;
use crate::manager::CacheManager;
use crate::options::EntryOptions;
use crate::traits::ExpiringStore;
use std::future::Future;
use tracing::trace;

impl<V, S> CacheManager<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: ExpiringStore<V>,
{
    /// Return the cached value for `key`, or compute, cache and return it.
    ///
    /// Blocks the calling thread while another caller populates the key.
    /// Must not be called from inside an async task; use
    /// [`get_or_add_async`](Self::get_or_add_async) there.
    ///
    /// # Examples
    ///
    /// ```
    /// use tagcache::{CacheError, CacheManager, EntryOptions};
    ///
    /// let cache = CacheManager::<u32>::new();
    /// let options = EntryOptions::new();
    ///
    /// let first = cache.get_or_add("x", || Ok::<_, CacheError>(42), &options).unwrap();
    /// let second = cache.get_or_add("x", || Ok::<_, CacheError>(99), &options).unwrap();
    /// assert_eq!((first, second), (42, 42));
    /// ```
    pub fn get_or_add<F, E>(&self, key: &str, factory: F, options: &EntryOptions) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
        E: From<CacheError>,
    {
        self.get_or_add_with(key, factory, |_| true, options)
    }

    /// Like [`get_or_add`](Self::get_or_add), caching the computed value only
    /// when `should_cache` accepts it.
    pub fn get_or_add_with<F, P, E>(
        &self,
        key: &str,
        factory: F,
        should_cache: P,
        options: &EntryOptions,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
        P: FnOnce(&V) -> bool,
        E: From<CacheError>,
    {
        let _guard = self.locks.acquire(key);
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }

        trace!(key = %key, "Cache miss, running factory");
        let value = factory()?;
        self.store_populated(key, value, should_cache, options)
    }

    /// Async counterpart of [`get_or_add`](Self::get_or_add).
    ///
    /// Shares the per-key lock with blocking callers. Waiting is bounded by
    /// the configured lock timeout, if any.
    pub async fn get_or_add_async<F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: &EntryOptions,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<CacheError>,
    {
        self.get_or_add_async_with(key, factory, |_| true, options)
            .await
    }

    /// Async counterpart of [`get_or_add_with`](Self::get_or_add_with).
    pub async fn get_or_add_async_with<F, Fut, P, E>(
        &self,
        key: &str,
        factory: F,
        should_cache: P,
        options: &EntryOptions,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        P: FnOnce(&V) -> bool,
        E: From<CacheError>,
    {
        let _guard = self
            .locks
            .acquire_async(key, self.config.lock_timeout)
            .await?;
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }

        trace!(key = %key, "Cache miss, running factory");
        let value = factory().await?;
        self.store_populated(key, value, should_cache, options)
    }

    /// Write a freshly computed value if `should_cache` accepts it.
    fn store_populated<P, E>(
        &self,
        key: &str,
        value: V,
        should_cache: P,
        options: &EntryOptions,
    ) -> Result<V, E>
    where
        P: FnOnce(&V) -> bool,
        E: From<CacheError>,
    {
        if should_cache(&value) {
            self.add(key, value.clone(), options)?;
        } else {
            trace!(key = %key, "Computed value rejected for caching");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::{CacheConfig, CacheError, CacheManager, EntryOptions};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    enum LoadError {
        #[error("backend unavailable")]
        Unavailable,
        #[error(transparent)]
        Cache(#[from] CacheError),
    }

    #[test]
    fn test_returns_cached_value_without_running_factory() {
        let cache = CacheManager::<String>::new();
        cache
            .add("k", "cached".to_string(), &EntryOptions::new())
            .unwrap();

        let value = cache
            .get_or_add(
                "k",
                || -> Result<String, CacheError> { panic!("factory must not run") },
                &EntryOptions::new(),
            )
            .unwrap();
        assert_eq!(value, "cached");
    }

    #[test]
    fn test_caches_new_value_with_tags() {
        let cache = CacheManager::<String>::new();
        let options = EntryOptions::new().with_tag("greetings");

        let value = cache
            .get_or_add("k", || Ok::<_, CacheError>("fresh".to_string()), &options)
            .unwrap();

        assert_eq!(value, "fresh");
        assert_eq!(cache.get("k").unwrap(), Some("fresh".to_string()));
        assert_eq!(cache.keys_for_tag("greetings"), vec!["k"]);
        assert_eq!(cache.pending_locks(), 0);
    }

    #[test]
    fn test_should_cache_rejects_value() {
        let cache = CacheManager::<String>::new();
        let value = cache
            .get_or_add_with(
                "k",
                || Ok::<_, CacheError>(String::new()),
                |value: &String| !value.is_empty(),
                &EntryOptions::new(),
            )
            .unwrap();

        assert_eq!(value, "");
        assert!(!cache.has_key("k").unwrap());
    }

    #[test]
    fn test_factory_error_propagates_and_is_not_cached() {
        let cache = CacheManager::<u32>::new();
        let err = cache
            .get_or_add("k", || Err(LoadError::Unavailable), &EntryOptions::new())
            .unwrap_err();

        assert!(matches!(err, LoadError::Unavailable));
        assert!(!cache.has_key("k").unwrap());
        assert_eq!(cache.pending_locks(), 0);

        let value = cache
            .get_or_add("k", || Ok::<_, LoadError>(7), &EntryOptions::new())
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_async_returns_cached_value() {
        let cache = CacheManager::<u32>::new();
        let options = EntryOptions::new();

        let first = cache
            .get_or_add_async("x", || async { Ok::<_, CacheError>(42) }, &options)
            .await
            .unwrap();
        let second = cache
            .get_or_add_async("x", || async { Ok::<_, CacheError>(99) }, &options)
            .await
            .unwrap();

        assert_eq!(first, 42);
        assert_eq!(second, 42);
    }

    #[tokio::test]
    async fn test_async_should_cache_rejects_value() {
        let cache = CacheManager::<u32>::new();
        let value = cache
            .get_or_add_async_with(
                "k",
                || async { Ok::<_, CacheError>(0) },
                |value: &u32| *value > 0,
                &EntryOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(value, 0);
        assert!(!cache.has_key_async("k").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_async_callers_run_factory_once() {
        let cache = Arc::new(CacheManager::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_add_async(
                            "k",
                            move || async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                Ok::<_, CacheError>(42)
                            },
                            &EntryOptions::new(),
                        )
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.pending_locks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiters_retry_after_failure() {
        let cache = Arc::new(CacheManager::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_add_async(
                            "k",
                            move || async move {
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                // Only the first attempt fails
                                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                                    Err(LoadError::Unavailable)
                                } else {
                                    Ok(5)
                                }
                            },
                            &EntryOptions::new(),
                        )
                        .await
                })
            })
            .collect();

        let mut failures = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(value) => assert_eq!(value, 5),
                Err(LoadError::Unavailable) => failures += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_timeout_surfaces_as_error() {
        let config = CacheConfig::default().with_lock_timeout(Duration::from_millis(100));
        let cache = Arc::new(CacheManager::<u32>::from_config(config));

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_add_async(
                        "k",
                        || async {
                            tokio::time::sleep(Duration::from_secs(10)).await;
                            Ok::<_, CacheError>(1)
                        },
                        &EntryOptions::new(),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        let err = cache
            .get_or_add_async("k", || async { Ok::<_, CacheError>(2) }, &EntryOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_lock_timeout());

        assert_eq!(slow.await.unwrap().unwrap(), 1);
        assert_eq!(cache.get("k").unwrap(), Some(1));
    }
}
