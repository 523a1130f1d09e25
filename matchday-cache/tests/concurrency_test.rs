//! Single-flight behaviour under concurrent callers

use matchday_cache::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_run_loader_once() {
    let cache = VersionedCache::new(InMemoryStore::new(), CacheConfig::memory());
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_with_meta(
                    "season:42:table",
                    move || async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                    },
                    60_u64,
                )
                .await
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let cached = handle.await.unwrap().unwrap();
        seen.insert((cached.value, cached.version));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen.len(), 1);
    assert!(seen.contains(&(1, 1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_across_clients_share_store_lock() {
    // Two clients over one store behave like two processes sharing Redis
    let store = InMemoryStore::new();
    let config = CacheConfig::memory().with_poll_interval(Duration::from_millis(5));
    let clients = [
        VersionedCache::new(store.clone(), config.clone()),
        VersionedCache::new(store, config),
    ];
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for i in 0..20 {
        let cache = clients[i % 2].clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get(
                    "user:7:subs",
                    move || async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                    },
                    60_u64,
                )
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_keys_load_in_parallel() {
    let cache = VersionedCache::new(InMemoryStore::new(), CacheConfig::memory());
    let started = tokio::time::Instant::now();

    let mut handles = Vec::new();
    for i in 0..10 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get(
                    &format!("club:{}:stats", i),
                    move || async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(i)
                    },
                    60_u64,
                )
                .await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), i);
    }

    assert!(started.elapsed() < Duration::from_millis(900));
}
