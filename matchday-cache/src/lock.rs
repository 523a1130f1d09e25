//! Best-effort cross-process loader lock.
//!
//! The lock is advisory: if the holder stalls past the timeout the record
//! expires and another caller may run the same loader. Loaders therefore have
//! to be idempotent or free of side effects.

use crate::error::CacheResult;
use crate::traits::CacheStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock guard that releases on drop if not released explicitly.
pub struct LockGuard<S: CacheStore> {
    store: Arc<S>,
    key: String,
    token: String,
    released: bool,
}

impl<S: CacheStore> LockGuard<S> {
    /// Try to take the lock for `key` without waiting.
    pub async fn try_acquire(
        store: &Arc<S>,
        key: &str,
        ttl: Duration,
    ) -> CacheResult<Option<Self>> {
        let token = Uuid::new_v4().to_string();

        if store.try_lock(key, &token, ttl).await? {
            debug!(key, "Acquired loader lock");
            Ok(Some(Self {
                store: Arc::clone(store),
                key: key.to_string(),
                token,
                released: false,
            }))
        } else {
            debug!(key, "Loader lock already held");
            Ok(None)
        }
    }

    /// The guarded key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock.
    ///
    /// Returns `Ok(false)` if the lock expired before release, meaning another
    /// caller may have run the loader concurrently.
    pub async fn release(mut self) -> CacheResult<bool> {
        self.released = true;
        let released = self.store.unlock(&self.key, &self.token).await?;
        if released {
            debug!(key = %self.key, "Released loader lock");
        } else {
            warn!(key = %self.key, "Loader lock expired before release");
        }
        Ok(released)
    }
}

impl<S: CacheStore> Drop for LockGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Best effort release when the holder unwound without releasing
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        handle.spawn(async move {
            let _ = store.unlock(&key, &token).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = Arc::new(InMemoryStore::new());
        let guard = LockGuard::try_acquire(&store, "k", Duration::from_secs(5))
            .await
            .unwrap()
            .expect("lock is free");
        assert_eq!(guard.key(), "k");

        assert!(LockGuard::try_acquire(&store, "k", Duration::from_secs(5))
            .await
            .unwrap()
            .is_none());

        assert!(guard.release().await.unwrap());
        assert!(store.try_lock("k", "other", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let store = Arc::new(InMemoryStore::new());
        let guard = LockGuard::try_acquire(&store, "k", Duration::from_secs(5))
            .await
            .unwrap();
        drop(guard);

        for _ in 0..50 {
            if store.try_lock("k", "other", Duration::from_secs(5)).await.unwrap() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("lock was not released on drop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_expiry() {
        let store = Arc::new(InMemoryStore::new());
        let guard = LockGuard::try_acquire(&store, "k", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!guard.release().await.unwrap());
    }
}
