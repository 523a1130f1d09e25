//! Versioned read-through cache for Matchday.
//!
//! Wraps an expensive computation (a season table, a user's subscriptions)
//! behind a shared key-value store and adds:
//!
//! - **TTL expiry** - entries are fresh for `ttl`, then hard-expire
//! - **Stale-while-revalidate** - for `stale_while_revalidate` after expiry
//!   the old value is served while one background task reloads it
//! - **Versions** - every store under a key gets a strictly larger version,
//!   surviving invalidation
//! - **Single-flight loading** - concurrent misses for a key run the loader
//!   once, in-process and across processes sharing a Redis
//! - **Weak ETags** - `W/"<key>:<version>"` plus `If-None-Match` handling
//!
//! # Features
//!
//! - `redis` - Enable the Redis backing store (enabled by default)
//!
//! # Examples
//!
//! ## Read-through with stale-while-revalidate
//!
//! ```no_run
//! use matchday_cache::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let config = CacheConfig::redis("redis://localhost:6379")?.with_key_prefix("matchday");
//!     let cache = VersionedCache::new(RedisStore::new(&config).await?, config);
//!
//!     let standings = cache
//!         .get_with_meta(
//!             "season:42:table",
//!             || async { Ok(vec![("Arsenal".to_string(), 61_u32)]) },
//!             CacheOptions::secs(60, 300),
//!         )
//!         .await?;
//!
//!     println!("version {} ({})", standings.version, standings.status.as_str());
//!     Ok(())
//! }
//! ```
//!
//! ## Invalidation after a write
//!
//! ```
//! use matchday_cache::*;
//!
//! # async fn example() -> Result<(), CacheError> {
//! let cache = VersionedCache::new(InMemoryStore::new(), CacheConfig::memory());
//!
//! cache.set("user:1:subs", &vec![42_u32], 30_u64).await?;
//! cache.invalidate_prefix("user:1:").await?;
//!
//! let subs: Vec<u32> = cache
//!     .get("user:1:subs", || async { Ok(vec![42, 7]) }, 30_u64)
//!     .await?;
//! assert_eq!(subs, vec![42, 7]);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod etag;
mod flight;
pub mod http;
pub mod lock;
pub mod memory;
pub mod stats;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use client::{CacheStatus, CachedValue, VersionedCache};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{CacheBackend, CacheConfig, CacheOptions};
pub use entry::{CacheEntry, Freshness};
pub use error::{CacheError, CacheResult};
pub use etag::{build_weak_etag, matches_if_none_match, matches_if_none_match_value};
pub use lock::LockGuard;
pub use memory::InMemoryStore;
pub use stats::CacheStatsSnapshot;
pub use traits::CacheStore;

#[cfg(feature = "redis")]
pub use redis_cache::RedisStore;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::client::{CacheStatus, CachedValue, VersionedCache};
    pub use crate::config::{CacheConfig, CacheOptions};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::etag::{build_weak_etag, matches_if_none_match};
    pub use crate::http::{CacheControl, ConditionalResponse, conditional_response};
    pub use crate::memory::InMemoryStore;
    pub use crate::traits::CacheStore;

    #[cfg(feature = "redis")]
    pub use crate::redis_cache::RedisStore;
}
