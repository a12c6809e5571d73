//! Cache configuration types.

use crate::error::{CacheError, CacheResult};
use crate::options::ExpirationPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between background expiration sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Expiration applied when an entry is added without its own policy
    pub default_expiration: ExpirationPolicy,

    /// Maximum time an async `get_or_add` waits for the key's lock
    pub lock_timeout: Option<Duration>,

    /// Interval of the background expiration sweeper (`None` or zero disables it)
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expiration: ExpirationPolicy::none(),
            lock_timeout: None,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// - `TAGCACHE_DEFAULT_TTL_SECS` - default relative expiration
    /// - `TAGCACHE_DEFAULT_SLIDING_SECS` - default sliding expiration
    /// - `TAGCACHE_LOCK_TIMEOUT_MS` - async lock acquisition timeout
    /// - `TAGCACHE_SWEEP_INTERVAL_MS` - sweeper interval, `0` disables it
    pub fn from_env() -> CacheResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Examples
    ///
    /// ```
    /// use tagcache::CacheConfig;
    /// use std::time::Duration;
    ///
    /// let config = CacheConfig::from_lookup(|name| match name {
    ///     "TAGCACHE_LOCK_TIMEOUT_MS" => Some("250".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(config.lock_timeout, Some(Duration::from_millis(250)));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> CacheResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_u64(&lookup, "TAGCACHE_DEFAULT_TTL_SECS")? {
            config.default_expiration = config
                .default_expiration
                .with_relative(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_u64(&lookup, "TAGCACHE_DEFAULT_SLIDING_SECS")? {
            config.default_expiration = config
                .default_expiration
                .with_sliding(Duration::from_secs(secs));
        }
        if let Some(ms) = parse_u64(&lookup, "TAGCACHE_LOCK_TIMEOUT_MS")? {
            config.lock_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_u64(&lookup, "TAGCACHE_SWEEP_INTERVAL_MS")? {
            config.sweep_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// Set the default expiration policy.
    pub fn with_default_expiration(mut self, expiration: ExpirationPolicy) -> Self {
        self.default_expiration = expiration;
        self
    }

    /// Set the async lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Set the sweeper interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Disable the background sweeper.
    pub fn without_sweeper(mut self) -> Self {
        self.sweep_interval = None;
        self
    }
}

fn parse_u64<F>(lookup: &F, name: &str) -> CacheResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| CacheError::config(format!("{name}={raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.default_expiration.is_none());
        assert_eq!(config.lock_timeout, None);
        assert_eq!(config.sweep_interval, Some(DEFAULT_SWEEP_INTERVAL));
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::default()
            .with_default_expiration(ExpirationPolicy::sliding(Duration::from_secs(30)))
            .with_lock_timeout(Duration::from_secs(2))
            .without_sweeper();

        assert_eq!(
            config.default_expiration.sliding_expiration,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.lock_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.sweep_interval, None);
    }

    #[test]
    fn test_from_lookup() {
        let config = CacheConfig::from_lookup(lookup(&[
            ("TAGCACHE_DEFAULT_TTL_SECS", "300"),
            ("TAGCACHE_DEFAULT_SLIDING_SECS", " 60 "),
            ("TAGCACHE_SWEEP_INTERVAL_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(
            config.default_expiration,
            ExpirationPolicy::relative(Duration::from_secs(300))
                .with_sliding(Duration::from_secs(60))
        );
        assert_eq!(config.lock_timeout, None);
        assert_eq!(config.sweep_interval, None);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = CacheConfig::from_lookup(lookup(&[("TAGCACHE_LOCK_TIMEOUT_MS", "soon")]))
            .unwrap_err();

        assert!(
            matches!(err, CacheError::Config(ref msg) if msg.contains("TAGCACHE_LOCK_TIMEOUT_MS"))
        );
    }

    #[test]
    fn test_empty_lookup_is_default() {
        let config = CacheConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, CacheConfig::default());
    }
}
