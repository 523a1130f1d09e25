//! Backing store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Namespace for per-key lock records.
pub const LOCK_PREFIX: &str = "lock:";

/// Namespace for per-key version counters.
pub const VERSION_PREFIX: &str = "ver:";

/// Key of the lock record guarding `key`.
pub fn lock_key(key: &str) -> String {
    format!("{}{}", LOCK_PREFIX, key)
}

/// Key of the version counter for `key`.
pub fn version_key(key: &str) -> String {
    format!("{}{}", VERSION_PREFIX, key)
}

/// Key-value store the versioned cache is layered on.
///
/// Entries, lock records and version counters live in separate namespaces.
/// Implementations must make [`CacheStore::put_entry`] and
/// [`CacheStore::try_lock`] atomic with respect to concurrent callers,
/// including callers in other processes when the store is shared.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Get the encoded entry stored under `key`.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(payload))` if the key exists, `Ok(None)` if not found
    /// or evicted, or an error if the store is unreachable.
    async fn get_entry(&self, key: &str) -> CacheResult<Option<String>>;

    /// Install an encoded entry unless a newer version was already written.
    ///
    /// # Arguments
    ///
    /// * `key` - The entry key
    /// * `version` - Version carried by `payload`
    /// * `payload` - The encoded entry
    /// * `ttl` - How long the store keeps the entry
    ///
    /// # Returns
    ///
    /// Returns `Ok(true)` if the entry was written, `Ok(false)` if a write with
    /// an equal or higher version has already been accepted for this key.
    async fn put_entry(
        &self,
        key: &str,
        version: u64,
        payload: String,
        ttl: Duration,
    ) -> CacheResult<bool>;

    /// Delete an entry. Lock records and version counters are kept.
    ///
    /// Every version allocated for `key` so far is fenced out, so a load that
    /// reserved its version before the delete cannot write afterwards.
    /// Returns whether an entry was removed.
    async fn delete_entry(&self, key: &str) -> CacheResult<bool>;

    /// Delete every entry whose key starts with `prefix`, fencing each key
    /// like [`CacheStore::delete_entry`].
    ///
    /// Returns the number of removed entries.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Allocate the next version for `key`. The first call returns `1`.
    ///
    /// Counters survive [`CacheStore::delete_entry`], so a version is never
    /// handed out twice for the same key.
    async fn next_version(&self, key: &str) -> CacheResult<u64>;

    /// Create the lock record for `key` if none is held.
    ///
    /// # Arguments
    ///
    /// * `key` - The entry key the lock guards
    /// * `token` - Owner token, required to release the lock
    /// * `ttl` - Lock expiry
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remove the lock record for `key` if it is still owned by `token`.
    ///
    /// Returns `Ok(false)` when the lock expired or is owned by someone else.
    async fn unlock(&self, key: &str, token: &str) -> CacheResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_keys() {
        assert_eq!(lock_key("season:42:club-stats"), "lock:season:42:club-stats");
        assert_eq!(version_key("user:1:subscriptions"), "ver:user:1:subscriptions");
    }
}
