//! Versioned read-through cache client.

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, CacheOptions};
use crate::entry::{CacheEntry, Freshness};
use crate::error::{CacheError, CacheResult};
use crate::etag::build_weak_etag;
use crate::flight::{FlightMap, RefreshTracker};
use crate::lock::LockGuard;
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::traits::CacheStore;
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Fresh entry served from the store
    Hit,
    /// Stale entry served while a refresh runs in the background
    Stale,
    /// Produced by the loader for this call
    Miss,
}

impl CacheStatus {
    /// Short label, e.g. for an `X-Cache` response header.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A value with the version it was stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue<T> {
    /// The value
    pub value: T,
    /// Version of the entry the value belongs to
    pub version: u64,
    /// How the value was obtained
    pub status: CacheStatus,
}

impl<T> CachedValue<T> {
    fn from_entry(entry: CacheEntry<T>, status: CacheStatus) -> Self {
        Self {
            value: entry.value,
            version: entry.version,
            status,
        }
    }

    /// Weak ETag for this value under `key`.
    pub fn etag(&self, key: &str) -> String {
        build_weak_etag(key, self.version)
    }
}

/// Outcome of waiting on a lock held by someone else.
enum Contended<T, S: CacheStore> {
    /// A servable entry appeared
    Entry(CacheEntry<T>),
    /// The holder went away and the lock is now ours
    Acquired(LockGuard<S>),
    /// The wait budget ran out
    TimedOut,
}

struct Inner<S: CacheStore> {
    store: Arc<S>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    flights: FlightMap,
    refreshes: RefreshTracker,
    stats: CacheStats,
}

/// Read-through cache with versioned entries, stale-while-revalidate and
/// single-flight loading.
///
/// Cloning is cheap; clones share the store, the in-process coordination
/// state and the statistics.
///
/// # Examples
///
/// ```
/// use matchday_cache::*;
///
/// # async fn example() -> CacheResult<()> {
/// let cache = VersionedCache::new(InMemoryStore::new(), CacheConfig::memory());
///
/// let table = cache
///     .get_with_meta(
///         "season:42:table",
///         || async { Ok(vec!["Arsenal".to_string(), "Liverpool".to_string()]) },
///         CacheOptions::secs(60, 300),
///     )
///     .await?;
///
/// assert_eq!(table.version, 1);
/// assert_eq!(table.etag("season:42:table"), r#"W/"season:42:table:1""#);
/// # Ok(())
/// # }
/// ```
pub struct VersionedCache<S: CacheStore> {
    inner: Arc<Inner<S>>,
}

impl<S: CacheStore> Clone for VersionedCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CacheStore> VersionedCache<S> {
    /// Create a cache over `store` using the system clock.
    pub fn new(store: S, config: CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit time source.
    pub fn with_clock(store: S, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Arc::new(store),
                config,
                clock,
                flights: FlightMap::default(),
                refreshes: RefreshTracker::default(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// The client configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Get a value, loading it on a miss. See [`VersionedCache::get_with_meta`].
    pub async fn get<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: impl Into<CacheOptions>,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        self.get_with_meta(key, loader, options)
            .await
            .map(|cached| cached.value)
    }

    /// Get a value and its version, loading it on a miss.
    ///
    /// - Fresh entries are returned without calling `loader`.
    /// - Stale entries are returned immediately; `loader` then runs in a
    ///   background task, at most once per entry version. Its failure is
    ///   logged and the stale entry stays in place.
    /// - Missing or hard-expired entries block on `loader`. Concurrent callers
    ///   for the same key wait for the first one; across processes the
    ///   `lock:<key>` record plays that role. If the lock stays held past
    ///   the configured wait budget the caller runs `loader` itself rather
    ///   than going without a value.
    ///
    /// The lock expires after the lock timeout even if its holder is stuck,
    /// after which the loader may run again elsewhere. Loaders must therefore
    /// be idempotent or free of side effects.
    ///
    /// # Errors
    ///
    /// Loader errors are returned to the caller that ran the loader. Store
    /// errors are returned as-is; [`CacheError::is_store_error`] tells them
    /// apart.
    pub async fn get_with_meta<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: impl Into<CacheOptions>,
    ) -> CacheResult<CachedValue<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        validate_key(key)?;
        let options = options.into();
        let key = self.inner.config.build_key(key);

        if let Some(entry) = self.read_entry::<T>(&key).await? {
            match entry.freshness(self.now()) {
                Freshness::Fresh => {
                    CacheStats::incr(&self.inner.stats.hits);
                    return Ok(CachedValue::from_entry(entry, CacheStatus::Hit));
                }
                Freshness::Stale => {
                    CacheStats::incr(&self.inner.stats.stale_hits);
                    self.spawn_refresh::<T, F, Fut>(key, &entry, loader, options);
                    return Ok(CachedValue::from_entry(entry, CacheStatus::Stale));
                }
                Freshness::Expired => {}
            }
        }

        CacheStats::incr(&self.inner.stats.misses);
        self.load_blocking(key, loader, options).await
    }

    /// Read the entry under `key` without loading anything.
    ///
    /// Hard-expired entries are reported as absent.
    pub async fn peek<T>(&self, key: &str) -> CacheResult<Option<CacheEntry<T>>>
    where
        T: DeserializeOwned,
    {
        validate_key(key)?;
        let key = self.inner.config.build_key(key);
        let now = self.now();
        Ok(self
            .read_entry::<T>(&key)
            .await?
            .filter(|entry| entry.freshness(now) != Freshness::Expired))
    }

    /// Install `value` directly, bypassing the loader.
    ///
    /// Used to warm the cache after a mutation recomputed a derived view.
    /// Returns the new version.
    pub async fn set<T>(
        &self,
        key: &str,
        value: &T,
        options: impl Into<CacheOptions>,
    ) -> CacheResult<u64>
    where
        T: Serialize,
    {
        validate_key(key)?;
        let options = options.into();
        let key = self.inner.config.build_key(key);
        self.write_entry(&key, value, &options).await
    }

    /// Remove the entry under `key`.
    ///
    /// The version counter is kept, so the next load gets a version no client
    /// has seen before. Removing a missing key is a no-op; the return value
    /// tells whether anything was removed.
    pub async fn invalidate(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;
        let key = self.inner.config.build_key(key);
        let removed = self.inner.store.delete_entry(&key).await?;
        self.inner.refreshes.clear(&key);
        debug!(key = %key, removed, "Invalidated cache entry");
        Ok(removed)
    }

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Returns the number of removed entries.
    pub async fn invalidate_prefix(&self, prefix: &str) -> CacheResult<u64> {
        if prefix.is_empty() {
            return Err(CacheError::InvalidKey(
                "prefix must not be empty".to_string(),
            ));
        }
        let prefix = self.inner.config.build_key(prefix);
        let removed = self.inner.store.delete_prefix(&prefix).await?;
        self.inner.refreshes.clear_prefix(&prefix);
        debug!(prefix = %prefix, removed, "Invalidated cache entries by prefix");
        Ok(removed)
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    fn lock_timeout(&self, options: &CacheOptions) -> Duration {
        options.lock_timeout.unwrap_or(self.inner.config.lock_timeout)
    }

    /// Read and decode an entry. Undecodable payloads count as absent so the
    /// next load replaces them.
    async fn read_entry<T>(&self, key: &str) -> CacheResult<Option<CacheEntry<T>>>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.inner.store.get_entry(key).await? else {
            return Ok(None);
        };

        match CacheEntry::decode(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(key, error = %err, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    async fn write_entry<T>(&self, key: &str, value: &T, options: &CacheOptions) -> CacheResult<u64>
    where
        T: Serialize,
    {
        let version = self.inner.store.next_version(key).await?;
        let (payload, ttl) = self.encode_entry(value, version, options)?;
        self.store_payload(key, version, payload, ttl).await?;
        Ok(version)
    }

    fn encode_entry<T>(
        &self,
        value: &T,
        version: u64,
        options: &CacheOptions,
    ) -> CacheResult<(String, Duration)>
    where
        T: Serialize,
    {
        let now = self.now();
        let entry = CacheEntry::new(value, version, now, options);
        Ok((entry.encode()?, entry.store_ttl(now)))
    }

    async fn store_payload(
        &self,
        key: &str,
        version: u64,
        payload: String,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let written = self.inner.store.put_entry(key, version, payload, ttl).await?;
        if written {
            self.inner.refreshes.clear(key);
            debug!(key, version, "Stored cache entry");
        } else {
            debug!(key, version, "Superseded by a newer write or an invalidation; write skipped");
        }
        Ok(written)
    }

    async fn run_loader<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: &CacheOptions,
    ) -> CacheResult<CachedValue<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        // Reserved before the loader runs, so a set or invalidation issued
        // meanwhile fences this result out
        let version = self.inner.store.next_version(key).await?;

        CacheStats::incr(&self.inner.stats.loads);
        let value = match loader().await {
            Ok(value) => value,
            Err(err) => {
                CacheStats::incr(&self.inner.stats.load_failures);
                return Err(err);
            }
        };

        // Only the owned value is held across awaits
        let (payload, ttl) = self.encode_entry(&value, version, options)?;
        if !self.store_payload(key, version, payload, ttl).await? {
            // Prefer whatever superseded this load; after an invalidation
            // there is nothing newer and the caller keeps its own result
            if let Some(current) = self.read_entry::<T>(key).await? {
                match current.freshness(self.now()) {
                    Freshness::Fresh => {
                        return Ok(CachedValue::from_entry(current, CacheStatus::Hit));
                    }
                    Freshness::Stale => {
                        return Ok(CachedValue::from_entry(current, CacheStatus::Stale));
                    }
                    Freshness::Expired => {}
                }
            }
        }

        Ok(CachedValue {
            value,
            version,
            status: CacheStatus::Miss,
        })
    }

    /// Miss path: queue behind other local loads, then take the store lock.
    async fn load_blocking<T, F, Fut>(
        &self,
        key: String,
        loader: F,
        options: CacheOptions,
    ) -> CacheResult<CachedValue<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let _flight = self.inner.flights.enter(&key).await;

        // Whoever held the slot before us may have loaded the entry already
        if let Some(entry) = self.read_entry::<T>(&key).await? {
            match entry.freshness(self.now()) {
                Freshness::Fresh => {
                    return Ok(CachedValue::from_entry(entry, CacheStatus::Hit));
                }
                Freshness::Stale => {
                    self.spawn_refresh::<T, F, Fut>(key, &entry, loader, options);
                    return Ok(CachedValue::from_entry(entry, CacheStatus::Stale));
                }
                Freshness::Expired => {}
            }
        }

        let lock_timeout = self.lock_timeout(&options);
        let lock = match LockGuard::try_acquire(&self.inner.store, &key, lock_timeout).await? {
            Some(lock) => Some(lock),
            None => {
                CacheStats::incr(&self.inner.stats.lock_contentions);
                match self.wait_for_holder::<T>(&key, lock_timeout).await? {
                    Contended::Entry(entry) => {
                        if entry.freshness(self.now()) == Freshness::Fresh {
                            return Ok(CachedValue::from_entry(entry, CacheStatus::Hit));
                        }
                        self.spawn_refresh::<T, F, Fut>(key, &entry, loader, options);
                        return Ok(CachedValue::from_entry(entry, CacheStatus::Stale));
                    }
                    Contended::Acquired(lock) => Some(lock),
                    Contended::TimedOut => {
                        CacheStats::incr(&self.inner.stats.fail_open);
                        warn!(key = %key, "Loader lock still held after wait budget; loading without it");
                        None
                    }
                }
            }
        };

        let result = self.run_loader(&key, loader, &options).await;

        if let Some(lock) = lock {
            if let Err(err) = lock.release().await {
                warn!(key = %key, error = %err, "Failed to release loader lock");
            }
        }

        result
    }

    /// Poll with exponential backoff until the entry appears, the lock frees
    /// up, or the wait budget runs out.
    async fn wait_for_holder<T>(
        &self,
        key: &str,
        lock_timeout: Duration,
    ) -> CacheResult<Contended<T, S>>
    where
        T: DeserializeOwned,
    {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.lock_wait;
        let mut delay = config.poll_interval.max(Duration::from_millis(1));

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Contended::TimedOut);
            }
            tokio::time::sleep(delay.min(remaining)).await;

            if let Some(entry) = self.read_entry::<T>(key).await? {
                if entry.freshness(self.now()) != Freshness::Expired {
                    debug!(key, version = entry.version, "Entry loaded by lock holder");
                    return Ok(Contended::Entry(entry));
                }
            }

            if let Some(lock) = LockGuard::try_acquire(&self.inner.store, key, lock_timeout).await? {
                // The holder may have written and released between the two reads
                if let Some(entry) = self.read_entry::<T>(key).await? {
                    if entry.freshness(self.now()) != Freshness::Expired {
                        if let Err(err) = lock.release().await {
                            warn!(key, error = %err, "Failed to release loader lock");
                        }
                        return Ok(Contended::Entry(entry));
                    }
                }
                return Ok(Contended::Acquired(lock));
            }

            delay = (delay * 2).min(config.max_poll_interval);
        }
    }

    /// Schedule a background refresh of a stale entry.
    fn spawn_refresh<T, F, Fut>(
        &self,
        key: String,
        entry: &CacheEntry<T>,
        loader: F,
        options: CacheOptions,
    ) where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let version = entry.version;
        if !self
            .inner
            .refreshes
            .try_begin(&key, version, entry.stale_until, self.now())
        {
            debug!(key = %key, version, "Refresh already attempted for this version");
            return;
        }

        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.refresh::<T, F, Fut>(&key, loader, &options).await {
                CacheStats::incr(&cache.inner.stats.refresh_failures);
                warn!(key = %key, version, error = %err, "Background refresh failed; keeping stale entry");
            }
        });
    }

    async fn refresh<T, F, Fut>(&self, key: &str, loader: F, options: &CacheOptions) -> CacheResult<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let lock_timeout = self.lock_timeout(options);
        let Some(lock) = LockGuard::try_acquire(&self.inner.store, key, lock_timeout).await? else {
            debug!(key, "Refresh owned by another caller");
            return Ok(());
        };

        // Another process may have refreshed between our read and the lock
        let still_stale = match self.read_entry::<T>(key).await {
            Ok(Some(entry)) => entry.freshness(self.now()) != Freshness::Fresh,
            _ => true,
        };

        let result = if still_stale {
            CacheStats::incr(&self.inner.stats.background_refreshes);
            self.run_loader(key, loader, options).await.map(|_| ())
        } else {
            Ok(())
        };

        if let Err(err) = lock.release().await {
            warn!(key, error = %err, "Failed to release loader lock");
        }
        result
    }
}

fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}
