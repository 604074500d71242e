use super::*;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

fn cache_with(ttl_secs: u64, max_entries: usize, timeout_ms: u64) -> MessageCache {
    MessageCache::new(CacheSettings {
        ttl: Duration::from_secs(ttl_secs),
        max_entries,
        generation_timeout: Duration::from_millis(timeout_ms),
    })
}

fn key(n: u64) -> CacheKey {
    CacheKey::new("user_1", n, "ctx")
}

fn fallback() -> String {
    "Discover Bar Centrale just a few steps away!".to_string()
}

#[test]
fn test_cache_key_is_stable_and_distinct() {
    assert_eq!(key(1), key(1));
    assert_ne!(key(1), key(2));
    assert_ne!(CacheKey::new("user_1", 1, "a"), CacheKey::new("user_1", 1, "b"));
    assert_ne!(CacheKey::new("user_1", 1, "ctx"), CacheKey::new("user_2", 1, "ctx"));
    assert_eq!(key(1).as_str().len(), 64);
}

#[tokio::test]
async fn test_generate_then_hit() {
    let cache = cache_with(60, 100, 1000);

    let first = cache
        .get_or_generate(&key(1), fallback, || async { Ok::<_, String>("Hello!".to_string()) })
        .await;
    assert_eq!(first.source, MessageSource::Generated);
    assert_eq!(first.text, "Hello!");

    let second = cache
        .get_or_generate(&key(1), fallback, || async { Ok::<_, String>("Different".to_string()) })
        .await;
    assert_eq!(second.source, MessageSource::Cached);
    assert_eq!(second.text, "Hello!");

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.size, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_regenerated() {
    let cache = cache_with(10, 100, 1000);
    cache
        .get_or_generate(&key(1), fallback, || async { Ok::<_, String>("old".to_string()) })
        .await;

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(cache.get(&key(1)), None);

    let resolved = cache
        .get_or_generate(&key(1), fallback, || async { Ok::<_, String>("new".to_string()) })
        .await;
    assert_eq!(resolved.source, MessageSource::Generated);
    assert_eq!(resolved.text, "new");
}

#[tokio::test]
async fn test_failure_returns_fallback_and_clears_marker() {
    let cache = cache_with(60, 100, 1000);

    let resolved = cache
        .get_or_generate(&key(1), fallback, || async { Err::<String, _>("upstream 503") })
        .await;
    assert_eq!(resolved.source, MessageSource::Fallback);
    assert_eq!(resolved.text, fallback());
    assert!(cache.is_empty());

    // Not cached, so the next caller retries
    let retry = cache
        .get_or_generate(&key(1), fallback, || async { Ok::<_, String>("recovered".to_string()) })
        .await;
    assert_eq!(retry.source, MessageSource::Generated);
    assert_eq!(cache.stats().fallbacks, 1);
}

#[tokio::test]
async fn test_empty_text_counts_as_failure() {
    let cache = cache_with(60, 100, 1000);
    let resolved = cache
        .get_or_generate(&key(1), fallback, || async { Ok::<_, String>("   ".to_string()) })
        .await;
    assert_eq!(resolved.source, MessageSource::Fallback);
    assert!(cache.get(&key(1)).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_returns_fallback() {
    let cache = cache_with(60, 100, 200);
    let resolved = cache
        .get_or_generate(&key(1), fallback, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>("too late".to_string())
        })
        .await;
    assert_eq!(resolved.source, MessageSource::Fallback);
    assert_eq!(cache.in_flight().0, 0);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_generation() {
    let cache = Arc::new(cache_with(60, 100, 2000));
    let calls = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let release = release_rx.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_generate(&key(7), fallback, || async move {
                    let mut release = release;
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = release.wait_for(|go| *go).await;
                    Ok::<_, String>("shared".to_string())
                })
                .await
        }));
    }

    // Let every task reach the cache before the leader finishes
    while cache.stats().in_flight == 0 {
        tokio::task::yield_now().await;
    }
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    release_tx.send(true).unwrap();

    let mut sources = Vec::new();
    for handle in handles {
        let resolved = handle.await.unwrap();
        assert_eq!(resolved.text, "shared");
        sources.push(resolved.source);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sources.iter().filter(|s| **s == MessageSource::Generated).count(), 1);
    assert!(sources.iter().all(|s| *s != MessageSource::Fallback));
}

#[tokio::test]
async fn test_dropped_leader_clears_in_flight_marker() {
    let cache = Arc::new(cache_with(60, 100, 60_000));

    let leader = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_or_generate(&key(3), fallback, || std::future::pending::<Result<String, String>>())
                .await
        })
    };

    while cache.in_flight().0 == 0 {
        tokio::task::yield_now().await;
    }
    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());
    assert_eq!(cache.in_flight().0, 0);

    let next = cache
        .get_or_generate(&key(3), fallback, || async { Ok::<_, String>("fresh".to_string()) })
        .await;
    assert_eq!(next.source, MessageSource::Generated);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_evicts_oldest() {
    let cache = cache_with(3600, 2, 1000);
    for n in 1..=3 {
        cache
            .get_or_generate(&key(n), fallback, || async move { Ok::<_, String>(format!("msg {}", n)) })
            .await;
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    assert_eq!(cache.len(), 2);
    assert!(cache.get(&key(1)).is_none());
    assert_eq!(cache.get(&key(3)).as_deref(), Some("msg 3"));
}

#[tokio::test(start_paused = true)]
async fn test_purge_expired_and_invalidate() {
    let cache = cache_with(5, 100, 1000);
    cache
        .get_or_generate(&key(1), fallback, || async { Ok::<_, String>("a".to_string()) })
        .await;
    tokio::time::advance(Duration::from_secs(3)).await;
    cache
        .get_or_generate(&key(2), fallback, || async { Ok::<_, String>("b".to_string()) })
        .await;
    tokio::time::advance(Duration::from_secs(3)).await;

    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.len(), 1);

    assert!(cache.invalidate(&key(2)));
    assert!(!cache.invalidate(&key(2)));
    assert!(cache.is_empty());
}
