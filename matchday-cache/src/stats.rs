//! Cache statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated lock-free by the cache client.
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    pub(crate) hits: AtomicU64,
    pub(crate) stale_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) loads: AtomicU64,
    pub(crate) load_failures: AtomicU64,
    pub(crate) background_refreshes: AtomicU64,
    pub(crate) refresh_failures: AtomicU64,
    pub(crate) lock_contentions: AtomicU64,
    pub(crate) fail_open: AtomicU64,
}

impl CacheStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
            fail_open: self.fail_open.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Fresh entries served
    pub hits: u64,
    /// Stale entries served while a refresh was scheduled
    pub stale_hits: u64,
    /// Reads that found no servable entry
    pub misses: u64,
    /// Loader invocations, foreground and background
    pub loads: u64,
    /// Loader invocations that returned an error
    pub load_failures: u64,
    /// Background refreshes that ran a loader
    pub background_refreshes: u64,
    /// Background refreshes that failed
    pub refresh_failures: u64,
    /// Misses that found the loader lock held elsewhere
    pub lock_contentions: u64,
    /// Loads run without the lock after the wait budget ran out
    pub fail_open: u64,
}

impl CacheStatsSnapshot {
    /// Share of reads answered from the cache, stale or fresh.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = CacheStats::default();
        CacheStats::incr(&stats.hits);
        CacheStats::incr(&stats.hits);
        CacheStats::incr(&stats.stale_hits);
        CacheStats::incr(&stats.misses);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_ratio_empty() {
        assert_eq!(CacheStatsSnapshot::default().hit_ratio(), 0.0);
    }
}
