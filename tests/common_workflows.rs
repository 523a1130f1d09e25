//! Integration tests for common Matchday workflows.
//!
//! These tests go through the root crate's re-exports the way an
//! application would.

use http::header::{ETAG, IF_NONE_MATCH};
use http::{HeaderMap, StatusCode};
use matchday::cache::http::X_RESOURCE_VERSION;
use matchday::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TableRow {
    club: String,
    points: u32,
}

fn table() -> Vec<TableRow> {
    vec![
        TableRow {
            club: "Arsenal".to_string(),
            points: 61,
        },
        TableRow {
            club: "Liverpool".to_string(),
            points: 60,
        },
    ]
}

// =============================================================================
// Read-through + conditional GET
// =============================================================================

#[tokio::test]
async fn test_season_table_conditional_get() {
    let cache = VersionedCache::new(InMemoryStore::new(), CacheConfig::memory());
    let key = "season:42:table";

    let cached = cache
        .get_with_meta(key, || async { Ok(table()) }, CacheOptions::secs(60, 300))
        .await
        .unwrap();
    assert_eq!(cached.status, CacheStatus::Miss);

    let response =
        conditional_response(&HeaderMap::new(), key, &cached, CacheControl::public(60, 300))
            .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = serde_json::to_string(&cached.value).unwrap();
    let response = response.into_response(body);
    assert!(response.body().contains("Arsenal"));
    assert_eq!(response.headers()[X_RESOURCE_VERSION], "1");

    // Revalidation with the tag the client received
    let mut request = HeaderMap::new();
    request.insert(IF_NONE_MATCH, response.headers()[ETAG].clone());
    let again = cache
        .get_with_meta(key, || async { Ok(Vec::<TableRow>::new()) }, CacheOptions::secs(60, 300))
        .await
        .unwrap();
    let revalidated =
        conditional_response(&request, key, &again, CacheControl::public(60, 300)).unwrap();
    assert!(revalidated.is_not_modified());
    assert_eq!(revalidated.into_response(String::from("ignored")).body(), "");
}

// =============================================================================
// Write path
// =============================================================================

#[tokio::test]
async fn test_mutation_invalidates_user_views() {
    let cache = VersionedCache::new(InMemoryStore::new(), CacheConfig::memory());

    let before = cache
        .get_with_meta("user:1:subs", || async { Ok(vec![42_u32]) }, 30_u64)
        .await
        .unwrap();
    cache.set("user:1:prefs", &"dark".to_string(), 30_u64).await.unwrap();

    // Subscribing to club 7 touches every view of user 1
    assert_eq!(cache.invalidate_prefix("user:1:").await.unwrap(), 2);

    let after = cache
        .get_with_meta("user:1:subs", || async { Ok(vec![42_u32, 7]) }, 30_u64)
        .await
        .unwrap();
    assert_eq!(after.value, vec![42, 7]);
    assert!(after.version > before.version);
    assert_ne!(after.etag("user:1:subs"), before.etag("user:1:subs"));
}

#[tokio::test]
async fn test_stats_serialize() {
    let cache = VersionedCache::new(InMemoryStore::new(), CacheConfig::memory());
    cache.get("k", || async { Ok(1_u8) }, 30_u64).await.unwrap();
    cache.get("k", || async { Ok(2_u8) }, 30_u64).await.unwrap();

    let stats = serde_json::to_value(cache.stats()).unwrap();
    assert_eq!(stats["hits"], 1_u64);
    assert_eq!(stats["misses"], 1_u64);
    assert_eq!(stats["loads"], 1_u64);
}
