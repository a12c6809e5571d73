//! Per-key locks shared by blocking and async callers.
//!
//! Every key maps to one `tokio::sync::Mutex`. Blocking callers wait on it
//! with `blocking_lock_owned`, async callers with `lock_owned`, so both kinds
//! of caller exclude each other on the same key. A slot is reference-counted
//! by its holders and waiters and is dropped from the registry when the last
//! one leaves.
//!
//! [`WriteLocks`] is a separate, short-lived guard that keeps the tag
//! association and store write of a single `add` together.

use crate::error::{CacheError, CacheResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::hash::{BuildHasher, RandomState};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{trace, warn};

#[derive(Default)]
struct KeySlot {
    mutex: Arc<Mutex<()>>,
    holders: usize,
}

/// Registry of per-key locks.
#[derive(Default)]
pub struct KeyLockRegistry {
    slots: DashMap<String, KeySlot>,
}

/// Counts one holder or waiter against a slot until dropped.
struct Lease<'a> {
    slots: &'a DashMap<String, KeySlot>,
    key: String,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Entry::Occupied(mut slot) = self.slots.entry(std::mem::take(&mut self.key)) {
            slot.get_mut().holders -= 1;
            if slot.get().holders == 0 {
                slot.remove();
            }
        }
    }
}

/// Exclusive hold on one key. Released on drop.
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyLockGuard<'a> {
    // Field order matters: the mutex is released before the lease gives up its count
    _permit: OwnedMutexGuard<()>,
    _lease: Lease<'a>,
}

impl KeyLockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `key`, blocking the current thread until it is available.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context; use
    /// [`acquire_async`](Self::acquire_async) there.
    pub fn acquire(&self, key: &str) -> KeyLockGuard<'_> {
        let (lease, mutex) = self.checkout(key);
        let permit = mutex.blocking_lock_owned();
        trace!(key = %key, "Key lock acquired (blocking)");
        KeyLockGuard {
            _permit: permit,
            _lease: lease,
        }
    }

    /// Lock `key`, suspending until it is available or `timeout` elapses.
    ///
    /// Dropping the returned future before it completes gives up the wait
    /// without leaking the slot.
    pub async fn acquire_async(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> CacheResult<KeyLockGuard<'_>> {
        let (lease, mutex) = self.checkout(key);
        let permit = match timeout {
            Some(limit) => tokio::time::timeout(limit, mutex.lock_owned())
                .await
                .map_err(|_| {
                    warn!(key = %key, waited = ?limit, "Timed out waiting for key lock");
                    CacheError::LockTimeout {
                        key: key.to_string(),
                        waited: limit,
                    }
                })?,
            None => mutex.lock_owned().await,
        };
        trace!(key = %key, "Key lock acquired (async)");

        Ok(KeyLockGuard {
            _permit: permit,
            _lease: lease,
        })
    }

    /// Number of keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no key is locked or awaited.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn checkout(&self, key: &str) -> (Lease<'_>, Arc<Mutex<()>>) {
        let mut slot = self.slots.entry(key.to_string()).or_default();
        slot.holders += 1;
        let mutex = Arc::clone(&slot.mutex);
        drop(slot);

        let lease = Lease {
            slots: &self.slots,
            key: key.to_string(),
        };
        (lease, mutex)
    }
}

/// Number of stripes in a [`WriteLocks`] table.
const WRITE_STRIPES: usize = 64;

/// Striped locks ordering the tag association and store write of one key.
///
/// Held only across synchronous code, never across an await point, so it is
/// safe to take from async tasks. Kept apart from [`KeyLockRegistry`] so a
/// population holding its key lock can still write.
pub struct WriteLocks {
    stripes: Box<[std::sync::Mutex<()>]>,
    hasher: RandomState,
}

impl Default for WriteLocks {
    fn default() -> Self {
        Self {
            stripes: (0..WRITE_STRIPES)
                .map(|_| std::sync::Mutex::new(()))
                .collect(),
            hasher: RandomState::new(),
        }
    }
}

impl WriteLocks {
    /// Create a table with the default number of stripes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the stripe covering `key`.
    pub fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let index = (self.hasher.hash_one(key) % self.stripes.len() as u64) as usize;
        // The guarded data is `()`, so a poisoned stripe is still usable
        self.stripes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
