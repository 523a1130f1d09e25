//! Redis backing store.
//!
//! Layout per cache key `k`:
//!
//! - `k` - encoded entry (plain string with `PX` expiry)
//! - `lock:k` - lock record holding the owner token (`SET NX PX`)
//! - `ver:k` - hash with `next` (allocated versions) and `high` (highest
//!   installed or fenced version); it has no expiry so versions never repeat
//!
//! Entry writes, deletes and lock releases run as Lua scripts so that the
//! version fence and the owner check are atomic. A delete raises `high` to
//! `next`, which rejects loads that reserved their version before it.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheStore, VERSION_PREFIX, lock_key, version_key};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;
use tracing::{debug, info};

/// Installs an entry only when its version beats the recorded high-water mark.
const PUT_ENTRY_SCRIPT: &str = r#"
    local high = tonumber(redis.call("HGET", KEYS[2], "high") or "0")
    if tonumber(ARGV[1]) <= high then
        return 0
    end
    redis.call("HSET", KEYS[2], "high", ARGV[1])
    redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
    return 1
"#;

/// Deletes an entry and fences out every version allocated so far.
const DELETE_ENTRY_SCRIPT: &str = r#"
    local removed = redis.call("DEL", KEYS[1])
    local next = tonumber(redis.call("HGET", KEYS[2], "next") or "0")
    local high = tonumber(redis.call("HGET", KEYS[2], "high") or "0")
    if next > high then
        redis.call("HSET", KEYS[2], "high", next)
    end
    return removed
"#;

/// Deletes the lock record only if the caller still owns it.
const RELEASE_LOCK_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// Keys fetched per `SCAN` round during prefix deletion.
const SCAN_BATCH: usize = 500;

/// Redis cache store.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect using the URL from `config`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use matchday_cache::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), CacheError> {
    ///     let config = CacheConfig::redis("redis://localhost:6379")?;
    ///     let store = RedisStore::new(&config).await?;
    ///     let cache = VersionedCache::new(store, config);
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &CacheConfig) -> CacheResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| CacheError::Config("Redis backend requires a URL".to_string()))?;

        let client = Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;

        let connection =
            tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| CacheError::Timeout)?
                .map_err(|e| CacheError::Connection(e.to_string()))?;

        info!("Connected to Redis cache store");
        Ok(Self { connection })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Get the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get_entry(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn put_entry(
        &self,
        key: &str,
        version: u64,
        payload: String,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let written: i32 = redis::Script::new(PUT_ENTRY_SCRIPT)
            .key(key)
            .key(version_key(key))
            .arg(version)
            .arg(payload)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn delete_entry(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = redis::Script::new(DELETE_ENTRY_SCRIPT)
            .key(key)
            .key(version_key(key))
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        // Every key that ever had a version allocated has a counter, including
        // keys whose first load is still running
        let mut conn = self.connection.clone();
        let pattern = escape_pattern(&version_key(prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, counters): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            for counter in &counters {
                if let Some(key) = counter.strip_prefix(VERSION_PREFIX) {
                    if self.delete_entry(key).await? {
                        removed += 1;
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "Deleted entries by prefix");
        Ok(removed)
    }

    async fn next_version(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.connection.clone();
        let version: i64 = conn.hincr(version_key(key), "next", 1).await?;
        u64::try_from(version)
            .map_err(|_| CacheError::Deserialization(format!("negative version counter for {}", key)))
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.connection.clone();

        // SET NX PX for atomic acquire with TTL
        let result: Option<String> = redis::cmd("SET")
            .arg(lock_key(key))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let released: i32 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(lock_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_pattern() {
        assert_eq!(escape_pattern("user:1:"), "user:1:*");
        assert_eq!(escape_pattern("odd*[key]?"), "odd\\*\\[key\\]\\?*");
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[tokio::test]
    async fn test_new_requires_url() {
        let err = match RedisStore::new(&CacheConfig::memory()).await {
            Err(err) => err,
            Ok(_) => panic!("memory config has no URL"),
        };
        assert!(matches!(err, CacheError::Config(_)));
    }
}
