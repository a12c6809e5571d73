//! Tag-based cache invalidation

use crate::traits::{EvictionCallback, EvictionCause};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Tag to keys mapping, kept in step with the store through eviction callbacks.
///
/// Each bucket maps a key to the generation of the write that tagged it. A
/// repair only removes the key when its generation still matches, so the
/// callback of a replaced entry cannot strip tags from its replacement and
/// running a repair twice is harmless. Empty buckets are always removed.
#[derive(Default)]
pub struct TagIndex {
    tags: DashMap<String, HashMap<String, u64>>,
    generation: AtomicU64,
}

/// Repair action for one tagged write.
///
/// Captures its own snapshot of the tags so later writes to the same key
/// cannot change what it cleans up.
#[derive(Clone)]
pub struct TagRepair {
    index: Arc<TagIndex>,
    key: String,
    tags: Arc<[String]>,
    generation: u64,
}

impl TagRepair {
    /// Remove this write's key from every tag it was associated with.
    pub fn run(&self) {
        self.index.repair(&self.key, &self.tags, self.generation);
    }

    /// Wrap the repair as the entry's eviction callback.
    pub fn into_callback(self) -> EvictionCallback {
        Box::new(move |key: &str, cause: EvictionCause| {
            trace!(key = %key, cause = %cause, tags = self.tags.len(), "Repairing tag index");
            self.run();
        })
    }
}

impl TagIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key` to the bucket of every tag and return the matching repair.
    ///
    /// Duplicate tags are collapsed.
    pub fn associate<I, T>(self: &Arc<Self>, key: &str, tags: I) -> TagRepair
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut snapshot: Vec<String> = tags.into_iter().map(Into::into).collect();
        snapshot.sort_unstable();
        snapshot.dedup();

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        for tag in &snapshot {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string(), generation);
        }

        TagRepair {
            index: Arc::clone(self),
            key: key.to_string(),
            tags: snapshot.into(),
            generation,
        }
    }

    /// Remove `key` from each tag's bucket if it was put there by `generation`.
    pub fn repair(&self, key: &str, tags: &[String], generation: u64) {
        for tag in tags {
            if let Entry::Occupied(mut bucket) = self.tags.entry(tag.clone()) {
                if bucket.get().get(key) == Some(&generation) {
                    bucket.get_mut().remove(key);
                }
                if bucket.get().is_empty() {
                    bucket.remove();
                }
            }
        }
    }

    /// Atomically detach the bucket for `tag` and return its keys.
    ///
    /// Associations that land after this call go into a fresh bucket.
    pub fn evict(&self, tag: &str) -> Vec<String> {
        self.tags
            .remove(tag)
            .map(|(_, keys)| keys.into_keys().collect())
            .unwrap_or_default()
    }

    /// Drop every tag.
    pub fn clear(&self) {
        self.tags.clear();
    }

    /// Remove keys matching `predicate` from every bucket, pruning empty buckets.
    pub fn clear_matching<P>(&self, predicate: P)
    where
        P: Fn(&str) -> bool,
    {
        self.tags.retain(|_, keys| {
            keys.retain(|key, _| !predicate(key));
            !keys.is_empty()
        });
    }

    /// Get all keys with a specific tag
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tags
            .get(tag)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get all registered tags
    pub fn tags(&self) -> Vec<String> {
        self.tags.iter().map(|bucket| bucket.key().clone()).collect()
    }

    /// Number of registered tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether no tag is registered
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut keys: Vec<String>) -> Vec<String> {
        keys.sort();
        keys
    }

    #[test]
    fn test_associate_and_repair() {
        let index = Arc::new(TagIndex::new());
        let repair = index.associate("user:1", ["users", "active"]);
        index.associate("user:2", ["users"]);

        assert_eq!(sorted(index.keys_for_tag("users")), vec!["user:1", "user:2"]);
        assert_eq!(index.len(), 2);

        repair.run();
        assert_eq!(index.keys_for_tag("users"), vec!["user:2"]);
        assert!(index.keys_for_tag("active").is_empty());
        assert_eq!(index.tags(), vec!["users"]);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let index = Arc::new(TagIndex::new());
        let repair = index.associate("k", ["t"]);

        repair.run();
        repair.run();
        assert!(index.is_empty());
    }

    #[test]
    fn test_stale_repair_leaves_newer_association() {
        let index = Arc::new(TagIndex::new());
        let old = index.associate("k", ["t", "old-only"]);
        let _new = index.associate("k", ["t"]);

        // Old entry's callback fires after the replacement was tagged
        old.run();

        assert_eq!(index.keys_for_tag("t"), vec!["k"]);
        assert!(index.keys_for_tag("old-only").is_empty());
    }

    #[test]
    fn test_duplicate_tags_collapse() {
        let index = Arc::new(TagIndex::new());
        let repair = index.associate("k", ["t", "t", "t"]);
        assert_eq!(index.keys_for_tag("t"), vec!["k"]);

        repair.run();
        assert!(index.is_empty());
    }

    #[test]
    fn test_evict_detaches_bucket() {
        let index = Arc::new(TagIndex::new());
        let repair = index.associate("a", ["t"]);
        index.associate("b", ["t"]);

        assert_eq!(sorted(index.evict("t")), vec!["a", "b"]);
        assert!(index.keys_for_tag("t").is_empty());

        // A key re-tagged after the evict survives the late repair of its old write
        index.associate("a", ["t"]);
        repair.run();
        assert_eq!(index.keys_for_tag("t"), vec!["a"]);

        assert!(index.evict("missing").is_empty());
    }

    #[test]
    fn test_clear_matching_prunes_empty_buckets() {
        let index = Arc::new(TagIndex::new());
        index.associate("a1", ["alpha", "shared"]);
        index.associate("a2", ["alpha"]);
        index.associate("b1", ["beta", "shared"]);

        index.clear_matching(|key| key.starts_with('a'));

        assert_eq!(sorted(index.tags()), vec!["beta", "shared"]);
        assert_eq!(index.keys_for_tag("shared"), vec!["b1"]);

        index.clear();
        assert!(index.is_empty());
    }

    #[test]
    fn test_callback_runs_repair() {
        let index = Arc::new(TagIndex::new());
        let callback = index.associate("k", ["t"]).into_callback();
        callback("k", EvictionCause::Expired);
        assert!(index.is_empty());
    }
}
