//! Cache entry codec and freshness classification.

use crate::clock::duration_millis;
use crate::config::CacheOptions;
use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

/// A stored value together with its version and freshness window.
///
/// Timestamps are Unix milliseconds. The encoded form is a JSON object:
///
/// ```text
/// {"value":<payload>,"version":7,"expires_at":1718000000000,"stale_until":1718000300000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,
    /// Monotonic per-key version
    pub version: u64,
    /// End of the fresh window
    pub expires_at: u64,
    /// End of the stale window; never before `expires_at`
    pub stale_until: u64,
}

/// Where an entry sits relative to its freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `now < expires_at`
    Fresh,
    /// `expires_at <= now < stale_until`
    Stale,
    /// `now >= stale_until`; must not be served
    Expired,
}

impl<T> CacheEntry<T> {
    /// Build an entry written at `now` with the given options.
    pub fn new(value: T, version: u64, now: u64, options: &CacheOptions) -> Self {
        let expires_at = now.saturating_add(duration_millis(options.ttl));
        let stale_until = expires_at.saturating_add(duration_millis(options.stale_while_revalidate));
        Self {
            value,
            version,
            expires_at,
            stale_until,
        }
    }

    /// Classify the entry at `now`.
    pub fn freshness(&self, now: u64) -> Freshness {
        if now < self.expires_at {
            Freshness::Fresh
        } else if now < self.stale_until {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// How long the backing store should keep the entry around.
    ///
    /// Covers the stale window as well; never zero so that stores which reject
    /// a zero expiry still accept the write.
    pub fn store_ttl(&self, now: u64) -> Duration {
        Duration::from_millis(self.stale_until.saturating_sub(now).max(1))
    }

    /// Swap the payload while keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            value: f(self.value),
            version: self.version,
            expires_at: self.expires_at,
            stale_until: self.stale_until,
        }
    }
}

impl<T: Serialize> CacheEntry<T> {
    /// Encode into the store representation.
    pub fn encode(&self) -> CacheResult<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    /// Decode from the store representation.
    pub fn decode(raw: &str) -> CacheResult<Self> {
        let entry: Self =
            serde_json::from_str(raw).map_err(|e| CacheError::Deserialization(e.to_string()))?;
        if entry.stale_until < entry.expires_at {
            return Err(CacheError::Deserialization(format!(
                "stale_until {} precedes expires_at {}",
                entry.stale_until, entry.expires_at
            )));
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Standing {
        club: String,
        points: u32,
    }

    #[test]
    fn test_freshness_windows() {
        let entry = CacheEntry::new((), 1, 10_000, &CacheOptions::secs(1, 5));
        assert_eq!(entry.expires_at, 11_000);
        assert_eq!(entry.stale_until, 16_000);

        assert_eq!(entry.freshness(10_500), Freshness::Fresh);
        assert_eq!(entry.freshness(11_000), Freshness::Stale);
        assert_eq!(entry.freshness(15_999), Freshness::Stale);
        assert_eq!(entry.freshness(16_000), Freshness::Expired);
    }

    #[test]
    fn test_zero_ttl_without_swr_is_never_fresh() {
        let entry = CacheEntry::new((), 1, 500, &CacheOptions::secs(0, 0));
        assert_eq!(entry.freshness(500), Freshness::Expired);
        assert_eq!(entry.store_ttl(500), Duration::from_millis(1));
    }

    #[test]
    fn test_store_ttl_covers_stale_window() {
        let entry = CacheEntry::new((), 3, 0, &CacheOptions::secs(60, 300));
        assert_eq!(entry.store_ttl(0), Duration::from_secs(360));
        assert_eq!(entry.store_ttl(60_000), Duration::from_secs(300));
    }

    #[test]
    fn test_codec_keeps_metadata() {
        let entry = CacheEntry::new(
            vec![Standing {
                club: "Arsenal".into(),
                points: 84,
            }],
            7,
            1_000,
            &CacheOptions::secs(30, 60),
        );

        let raw = entry.encode().unwrap();
        assert!(raw.contains("\"version\":7"));

        let decoded: CacheEntry<Vec<Standing>> = CacheEntry::decode(&raw).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_rejects_inverted_window() {
        let raw = r#"{"value":1,"version":1,"expires_at":10,"stale_until":5}"#;
        let err = CacheEntry::<u32>::decode(raw).unwrap_err();
        assert!(matches!(err, CacheError::Deserialization(_)));
    }

    #[test]
    fn test_decode_type_mismatch() {
        let raw = r#"{"value":"text","version":1,"expires_at":10,"stale_until":10}"#;
        assert!(CacheEntry::<u32>::decode(raw).is_err());
    }
}
