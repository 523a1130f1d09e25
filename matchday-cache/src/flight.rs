//! In-process coordination of loader runs.
//!
//! [`FlightMap`] serializes blocking loads of the same key inside one process,
//! so concurrent misses queue behind a single loader instead of hammering the
//! backing store lock. [`RefreshTracker`] limits background refreshes to one
//! attempt per entry version.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key async slots for blocking loads.
#[derive(Default)]
pub(crate) struct FlightMap {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FlightMap {
    /// Wait for exclusive use of `key` within this process.
    pub(crate) async fn enter(&self, key: &str) -> FlightGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        let guard = slot.lock_owned().await;
        FlightGuard {
            map: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Exclusive slot for one key; frees the slot when the last user leaves.
pub(crate) struct FlightGuard<'a> {
    map: &'a FlightMap,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.map.slots.lock();
        // Only the map itself still references the slot: nobody is waiting
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

/// Remembers which entry versions already had a background refresh attempt.
#[derive(Default)]
pub(crate) struct RefreshTracker {
    attempted: Mutex<HashMap<String, Attempt>>,
}

struct Attempt {
    version: u64,
    /// Past this point the entry is gone and the record blocks nothing
    stale_until: u64,
}

impl RefreshTracker {
    /// Claim the refresh of `key` at `version`, an entry servable until
    /// `stale_until`.
    ///
    /// Returns `false` if a refresh for this version is running or has already
    /// failed; the stale entry is then served without another attempt.
    pub(crate) fn try_begin(&self, key: &str, version: u64, stale_until: u64, now: u64) -> bool {
        let mut attempted = self.attempted.lock();
        attempted.retain(|_, attempt| attempt.stale_until > now);

        match attempted.get(key) {
            Some(attempt) if attempt.version >= version => false,
            _ => {
                attempted.insert(
                    key.to_string(),
                    Attempt {
                        version,
                        stale_until,
                    },
                );
                true
            }
        }
    }

    /// Forget `key`, typically after a successful write or an invalidation.
    pub(crate) fn clear(&self, key: &str) {
        self.attempted.lock().remove(key);
    }

    /// Forget every key starting with `prefix`.
    pub(crate) fn clear_prefix(&self, prefix: &str) {
        self.attempted.lock().retain(|key, _| !key.starts_with(prefix));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.attempted.lock().len()
    }
}
