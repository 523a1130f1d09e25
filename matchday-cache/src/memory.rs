//! In-memory backing store.
//!
//! Suitable for single-process deployments and tests. Expiry is lazy: expired
//! records are ignored on read and replaced on write.

use crate::error::CacheResult;
use crate::traits::CacheStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Process-local [`CacheStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, StoredEntry>,
    locks: HashMap<String, LockRecord>,
    versions: HashMap<String, VersionRecord>,
}

struct StoredEntry {
    payload: String,
    expires_at: Instant,
}

struct LockRecord {
    token: String,
    expires_at: Instant,
}

#[derive(Default)]
struct VersionRecord {
    /// Last allocated version
    allocated: u64,
    /// Highest version installed or fenced out
    written: u64,
}

impl VersionRecord {
    /// Reject every version allocated so far.
    fn fence(&mut self) {
        self.written = self.written.max(self.allocated);
    }
}

impl InMemoryStore {
    /// Create new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let state = self.state.read().await;
        state.entries.values().filter(|e| e.expires_at > now).count()
    }

    /// Whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries and locks.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.entries.retain(|_, entry| entry.expires_at > now);
        state.locks.retain(|_, lock| lock.expires_at > now);
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get_entry(&self, key: &str) -> CacheResult<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.payload.clone()))
    }

    async fn put_entry(
        &self,
        key: &str,
        version: u64,
        payload: String,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let mut state = self.state.write().await;

        let record = state.versions.entry(key.to_string()).or_default();
        if version <= record.written {
            return Ok(false);
        }
        record.written = version;
        record.allocated = record.allocated.max(version);

        let entry = StoredEntry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        state.entries.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn delete_entry(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        if let Some(record) = state.versions.get_mut(key) {
            record.fence();
        }
        Ok(state
            .entries
            .remove(key)
            .is_some_and(|entry| entry.expires_at > now))
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state
            .versions
            .iter_mut()
            .filter(|(key, _)| key.starts_with(prefix))
            .for_each(|(_, record)| record.fence());

        let mut removed = 0;
        state.entries.retain(|key, entry| {
            if !key.starts_with(prefix) {
                return true;
            }
            if entry.expires_at > now {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }

    async fn next_version(&self, key: &str) -> CacheResult<u64> {
        let mut state = self.state.write().await;
        let record = state.versions.entry(key.to_string()).or_default();
        record.allocated += 1;
        Ok(record.allocated)
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        if state.locks.get(key).is_some_and(|lock| lock.expires_at > now) {
            return Ok(false);
        }
        state.locks.insert(
            key.to_string(),
            LockRecord {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let owned = state
            .locks
            .get(key)
            .is_some_and(|lock| lock.token == token && lock.expires_at > now);
        if owned {
            state.locks.remove(key);
        }
        Ok(owned)
    }
}
