//! Cache configuration types.

use crate::error::{CacheError, CacheResult};
use std::env;
use std::time::Duration;

/// Default lock timeout for a loader run.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default first backoff step while another process owns the lock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Default upper bound for the backoff step.
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cache backend type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// Process-local store
    Memory,
    /// Redis backend
    Redis,
}

/// Client-wide cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache backend type
    pub backend: CacheBackend,

    /// Connection URL (Redis only)
    pub url: Option<String>,

    /// Key prefix for all cache keys
    pub key_prefix: Option<String>,

    /// How long a loader may hold the per-key lock before it expires
    pub lock_timeout: Duration,

    /// How long a caller waits on a lock held elsewhere before running the
    /// loader itself
    pub lock_wait: Duration,

    /// First backoff step while waiting on a held lock
    pub poll_interval: Duration,

    /// Upper bound for the backoff step
    pub max_poll_interval: Duration,

    /// Connection timeout
    pub connection_timeout: Duration,
}

impl CacheConfig {
    /// Configuration for the process-local store.
    pub fn memory() -> Self {
        Self {
            backend: CacheBackend::Memory,
            url: None,
            key_prefix: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_wait: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Create a new Redis cache configuration.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Examples
    ///
    /// ```
    /// use matchday_cache::CacheConfig;
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379").unwrap();
    /// assert!(CacheConfig::redis("localhost:6379").is_err());
    /// ```
    pub fn redis(url: impl Into<String>) -> CacheResult<Self> {
        let url = url.into();
        let valid = ["redis://", "rediss://", "redis+unix://", "unix://"]
            .iter()
            .any(|scheme| url.starts_with(scheme));
        if !valid {
            return Err(CacheError::InvalidUrl(format!(
                "{}. Expected format: 'redis://host:port'",
                url
            )));
        }

        Ok(Self {
            backend: CacheBackend::Redis,
            url: Some(url),
            ..Self::memory()
        })
    }

    /// Build configuration from `MATCHDAY_CACHE_*` environment variables.
    ///
    /// - `MATCHDAY_CACHE_URL` - Redis URL; the memory backend is used when unset
    /// - `MATCHDAY_CACHE_PREFIX` - key prefix
    /// - `MATCHDAY_CACHE_LOCK_TIMEOUT_MS` - lock timeout in milliseconds
    /// - `MATCHDAY_CACHE_LOCK_WAIT_MS` - lock wait budget in milliseconds
    /// - `MATCHDAY_CACHE_POLL_MS` - first backoff step in milliseconds
    pub fn from_env() -> CacheResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`CacheConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> CacheResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("MATCHDAY_CACHE_URL").filter(|u| !u.is_empty()) {
            Some(url) => Self::redis(url)?,
            None => Self::memory(),
        };

        if let Some(prefix) = lookup("MATCHDAY_CACHE_PREFIX").filter(|p| !p.is_empty()) {
            config = config.with_key_prefix(prefix);
        }

        if let Some(timeout) = millis_var(&lookup, "MATCHDAY_CACHE_LOCK_TIMEOUT_MS")? {
            config = config.with_lock_timeout(timeout);
        }
        if let Some(wait) = millis_var(&lookup, "MATCHDAY_CACHE_LOCK_WAIT_MS")? {
            config = config.with_lock_wait(wait);
        }
        if let Some(poll) = millis_var(&lookup, "MATCHDAY_CACHE_POLL_MS")? {
            config = config.with_poll_interval(poll);
        }

        Ok(config)
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the lock timeout. The wait budget follows it unless set explicitly
    /// afterwards.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self.lock_wait = timeout;
        self
    }

    /// Set how long a caller waits on a lock held elsewhere.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Set the first backoff step.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        if self.max_poll_interval < interval {
            self.max_poll_interval = interval;
        }
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = interval.max(self.poll_interval);
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Build the final key with prefix if configured.
    pub fn build_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::memory()
    }
}

fn millis_var<F>(lookup: &F, name: &str) -> CacheResult<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| CacheError::Config(format!("{}={:?}: {}", name, raw, e))),
        None => Ok(None),
    }
}

/// Per-call freshness options.
///
/// A bare number of seconds or a [`Duration`] converts into options with
/// only the TTL set:
///
/// ```
/// use matchday_cache::CacheOptions;
/// use std::time::Duration;
///
/// let short: CacheOptions = 30_u64.into();
/// assert_eq!(short.ttl, Duration::from_secs(30));
/// assert_eq!(short.stale_while_revalidate, Duration::ZERO);
///
/// let table = CacheOptions::new(Duration::from_secs(60))
///     .with_stale_while_revalidate(Duration::from_secs(300));
/// assert_eq!(table.swr_seconds(), 300);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// How long an entry is fresh
    pub ttl: Duration,

    /// How long past `ttl` an entry may still be served while it refreshes
    pub stale_while_revalidate: Duration,

    /// Per-call lock timeout; the client default applies when unset
    pub lock_timeout: Option<Duration>,
}

impl CacheOptions {
    /// Options with the given TTL and stale serving disabled.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            stale_while_revalidate: Duration::ZERO,
            lock_timeout: None,
        }
    }

    /// Shorthand for whole-second TTL and stale window.
    pub fn secs(ttl: u64, stale_while_revalidate: u64) -> Self {
        Self::new(Duration::from_secs(ttl))
            .with_stale_while_revalidate(Duration::from_secs(stale_while_revalidate))
    }

    /// Set the stale-while-revalidate window.
    pub fn with_stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = window;
        self
    }

    /// Set the lock timeout for this call.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// TTL in whole seconds, for `Cache-Control: max-age`.
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Stale window in whole seconds, for `stale-while-revalidate`.
    pub fn swr_seconds(&self) -> u64 {
        self.stale_while_revalidate.as_secs()
    }
}

impl From<u64> for CacheOptions {
    fn from(ttl_seconds: u64) -> Self {
        Self::new(Duration::from_secs(ttl_seconds))
    }
}

impl From<Duration> for CacheOptions {
    fn from(ttl: Duration) -> Self {
        Self::new(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_redis_config() {
        let config = CacheConfig::redis("redis://localhost:6379").unwrap();
        assert_eq!(config.backend, CacheBackend::Redis);
        assert_eq!(config.url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn test_invalid_redis_url() {
        let err = CacheConfig::redis("memcache://localhost:11211").unwrap_err();
        assert!(matches!(err, CacheError::InvalidUrl(_)));
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::memory()
            .with_key_prefix("app")
            .with_lock_timeout(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(500));

        assert_eq!(config.key_prefix, Some("app".to_string()));
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.lock_wait, Duration::from_secs(2));
        assert_eq!(config.max_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_build_key_with_prefix() {
        let config = CacheConfig::memory().with_key_prefix("matchday");
        assert_eq!(config.build_key("season:5:club-stats"), "matchday:season:5:club-stats");
    }

    #[test]
    fn test_build_key_without_prefix() {
        let config = CacheConfig::memory();
        assert_eq!(config.build_key("user:123"), "user:123");
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("MATCHDAY_CACHE_URL", "redis://cache:6379/2"),
            ("MATCHDAY_CACHE_PREFIX", "prod"),
            ("MATCHDAY_CACHE_LOCK_TIMEOUT_MS", "1500"),
            ("MATCHDAY_CACHE_POLL_MS", "10"),
        ]
        .into_iter()
        .collect();

        let config =
            CacheConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.backend, CacheBackend::Redis);
        assert_eq!(config.key_prefix.as_deref(), Some("prod"));
        assert_eq!(config.lock_timeout, Duration::from_millis(1500));
        assert_eq!(config.lock_wait, Duration::from_millis(1500));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_from_lookup_defaults_to_memory() {
        let config = CacheConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.backend, CacheBackend::Memory);
        assert!(config.url.is_none());
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = CacheConfig::from_lookup(|name| {
            (name == "MATCHDAY_CACHE_LOCK_WAIT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_options_shorthand() {
        let from_secs: CacheOptions = 45_u64.into();
        let from_duration: CacheOptions = Duration::from_secs(45).into();
        assert_eq!(from_secs, from_duration);
        assert_eq!(from_secs.lock_timeout, None);

        let options = CacheOptions::secs(60, 300).with_lock_timeout(Duration::from_secs(1));
        assert_eq!(options.ttl_seconds(), 60);
        assert_eq!(options.swr_seconds(), 300);
        assert_eq!(options.lock_timeout, Some(Duration::from_secs(1)));
    }
}
