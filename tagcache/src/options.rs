//! Per-entry options: expiration policy and tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Expiration policy for a cache entry.
///
/// All fields are optional; an empty policy never expires. When both a
/// relative and an absolute deadline are set, the relative one wins. A
/// sliding window combines with the resulting absolute deadline and the
/// entry expires at whichever comes first.
///
/// # Examples
///
/// ```
/// use tagcache::ExpirationPolicy;
/// use std::time::Duration;
///
/// let policy = ExpirationPolicy::relative(Duration::from_secs(300))
///     .with_sliding(Duration::from_secs(30));
/// assert!(!policy.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Expire this long after the entry is written
    pub absolute_expiration_relative_to_now: Option<Duration>,

    /// Expire at this wall-clock time
    pub absolute_expiration: Option<DateTime<Utc>>,

    /// Expire when not accessed for this long
    pub sliding_expiration: Option<Duration>,
}

impl ExpirationPolicy {
    /// A policy that never expires.
    pub fn none() -> Self {
        Self::default()
    }

    /// Expire `ttl` after the write.
    pub fn relative(ttl: Duration) -> Self {
        Self::none().with_relative(ttl)
    }

    /// Expire at a fixed point in time.
    pub fn at(deadline: DateTime<Utc>) -> Self {
        Self::none().with_absolute(deadline)
    }

    /// Expire after `idle` without access.
    pub fn sliding(idle: Duration) -> Self {
        Self::none().with_sliding(idle)
    }

    /// Set the relative deadline.
    pub fn with_relative(mut self, ttl: Duration) -> Self {
        self.absolute_expiration_relative_to_now = Some(ttl);
        self
    }

    /// Set the absolute deadline.
    pub fn with_absolute(mut self, deadline: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(deadline);
        self
    }

    /// Set the sliding window.
    pub fn with_sliding(mut self, idle: Duration) -> Self {
        self.sliding_expiration = Some(idle);
        self
    }

    /// True when no expiration is configured.
    pub fn is_none(&self) -> bool {
        self.absolute_expiration_relative_to_now.is_none()
            && self.absolute_expiration.is_none()
            && self.sliding_expiration.is_none()
    }

    /// Resolve the absolute deadline for an entry written at `now`.
    ///
    /// Deadlines too far out to represent are treated as "never".
    pub fn absolute_deadline(&self, now: Instant) -> Option<Instant> {
        if let Some(ttl) = self.absolute_expiration_relative_to_now {
            return now.checked_add(ttl);
        }

        self.absolute_expiration.and_then(|deadline| {
            // Past deadlines clamp to zero and expire immediately
            let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            now.checked_add(remaining)
        })
    }
}

/// Options applied when writing an entry.
///
/// # Examples
///
/// ```
/// use tagcache::{EntryOptions, ExpirationPolicy};
/// use std::time::Duration;
///
/// let options = EntryOptions::new()
///     .with_expiration(ExpirationPolicy::sliding(Duration::from_secs(60)))
///     .with_tags(["users", "active-users"]);
/// assert_eq!(options.tags.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Expiration policy; `None` falls back to the cache's default
    pub expiration: Option<ExpirationPolicy>,

    /// Tags for bulk invalidation
    pub tags: Vec<String>,
}

impl EntryOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expiration policy.
    pub fn with_expiration(mut self, expiration: ExpirationPolicy) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Add a single tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add several tags.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}
