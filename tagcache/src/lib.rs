//! In-process caching with tag-based invalidation.
//!
//! Wraps an expiring key-value store with a tag index and per-key locks so
//! that groups of entries can be invalidated together and expensive values
//! are computed once per key, no matter how many callers ask at the same time.
//!
//! # Features
//!
//! - **Tag-based invalidation** - Attach tags to entries and evict every entry
//!   carrying a tag in one call
//! - **Self-healing tag index** - Entries that expire or are removed clean up
//!   their own tags through eviction callbacks
//! - **Single-flight population** - `get_or_add` runs at most one factory per
//!   key across blocking and async callers
//! - **Flexible expiration** - Relative, absolute and sliding deadlines
//!
//! # Examples
//!
//! ## Tag-based Invalidation
//!
//! ```
//! use tagcache::prelude::*;
//!
//! # fn main() -> Result<(), CacheError> {
//! let cache = CacheManager::<String>::new();
//! let options = EntryOptions::new().with_tags(["users", "active-users"]);
//!
//! cache.add("user:1", r#"{"name":"Alice"}"#.to_string(), &options)?;
//! cache.add("user:2", r#"{"name":"Bob"}"#.to_string(), &options)?;
//!
//! // Invalidate all entries with "users" tag
//! assert_eq!(cache.evict_by_tag("users")?, 2);
//! assert!(!cache.has_key("user:1")?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Single-flight Population
//!
//! ```
//! use tagcache::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = CacheManager::<u64>::new();
//! let options = EntryOptions::new()
//!     .with_expiration(ExpirationPolicy::relative(Duration::from_secs(60)))
//!     .with_tag("reports");
//!
//! let total = cache
//!     .get_or_add_async("report:total", || async { Ok::<_, CacheError>(1234) }, &options)
//!     .await?;
//! assert_eq!(total, 1234);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod invalidation;
pub mod lock;
pub mod manager;
pub mod memory;
pub mod options;
pub mod traits;

mod populate;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use invalidation::{TagIndex, TagRepair};
pub use lock::{KeyLockGuard, KeyLockRegistry, WriteLocks};
pub use manager::CacheManager;
pub use memory::MemoryStore;
pub use options::{EntryOptions, ExpirationPolicy};
pub use traits::{EvictionCallback, EvictionCause, ExpiringStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CacheConfig;
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::manager::CacheManager;
    pub use crate::memory::MemoryStore;
    pub use crate::options::{EntryOptions, ExpirationPolicy};
    pub use crate::traits::{EvictionCause, ExpiringStore};
}
