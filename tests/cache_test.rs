//! Content cache backends and key construction.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use huginn::cache::{
    CacheBackend, CacheKey, CachedContent, MemoryCacheBackend, MokaCacheBackend,
};
use huginn::jobs::Metadata;

fn content(key: &str) -> CachedContent {
    CachedContent::new(key, format!("generated text for {key}"), "gpt-4")
}

fn backends() -> Vec<Arc<dyn CacheBackend>> {
    vec![
        Arc::new(MemoryCacheBackend::new(16)),
        Arc::new(MokaCacheBackend::new(16)),
    ]
}

#[tokio::test]
async fn expired_entry_is_absent_and_not_exists() {
    for cache in backends() {
        cache
            .set("short", content("short"), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        cache.set("long", content("long"), None).await.unwrap();
        assert!(cache.exists("short").await.unwrap(), "{}", cache.name());

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(cache.get("short").await.unwrap().is_none(), "{}", cache.name());
        assert!(!cache.exists("short").await.unwrap(), "{}", cache.name());
        assert!(cache.get("long").await.unwrap().is_some(), "{}", cache.name());
    }
}

#[tokio::test]
async fn max_size_two_evicts_oldest_of_a_b_c() {
    let cache = MemoryCacheBackend::new(2);
    let now = Utc::now();
    for (i, key) in ["A", "B", "C"].into_iter().enumerate() {
        let created = now + chrono::Duration::milliseconds(i as i64);
        cache
            .set(key, content(key).with_created_at(created), None)
            .await
            .unwrap();
    }

    assert!(!cache.exists("A").await.unwrap());
    assert!(cache.exists("B").await.unwrap());
    assert!(cache.exists("C").await.unwrap());
    assert_eq!(cache.stats().await.unwrap().size, 2);
}

#[tokio::test]
async fn memory_backend_never_exceeds_capacity() {
    let cache = MemoryCacheBackend::new(5);
    for i in 0..50 {
        let key = format!("k{i}");
        cache.set(&key, content(&key), None).await.unwrap();
        assert!(cache.stats().await.unwrap().size <= 5);
    }
    // The five most recent survive.
    for i in 45..50 {
        assert!(cache.exists(&format!("k{i}")).await.unwrap());
    }
}

#[tokio::test]
async fn moka_backend_stays_bounded() {
    let cache = MokaCacheBackend::new(10);
    for i in 0..200 {
        let key = format!("k{i}");
        cache.set(&key, content(&key), None).await.unwrap();
    }
    let stats = cache.stats().await.unwrap();
    assert!(stats.size <= 10, "size {} over capacity", stats.size);
    assert_eq!(stats.capacity, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_and_writers_see_whole_entries() {
    let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCacheBackend::new(8));
    let mut tasks = Vec::new();
    for t in 0..8 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..200 {
                let key = format!("k{}", i % 4);
                if (t + i) % 3 == 0 {
                    let text = format!("{key}:{t}:{i}");
                    cache
                        .set(&key, CachedContent::new(key.clone(), text, "m"), None)
                        .await
                        .unwrap();
                } else if let Some(found) = cache.get(&key).await.unwrap() {
                    // Content and key were written together.
                    assert!(found.content.starts_with(&format!("{key}:")));
                    assert_eq!(found.cache_key, key);
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[test]
fn key_string_format_is_stable() {
    let mut params = Metadata::new();
    params.insert("tone".into(), json!("formal"));
    params.insert("length".into(), json!(500));
    let key = CacheKey::new("blog", "concise", params, "gpt-4");
    assert_eq!(key.to_string(), "content:v1:blog:concise:gpt-4:d0d94eb4");
    assert_eq!(
        key.with_version("v2").to_string(),
        "content:v2:blog:concise:gpt-4:d0d94eb4"
    );
}

#[test]
fn key_ignores_parameter_insertion_order() {
    let pairs = [
        ("audience", json!("developers")),
        ("length", json!(1200)),
        ("sections", json!(["intro", "body"])),
        ("style", json!({"voice": "active", "person": "second"})),
    ];
    let forward: Metadata = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    let backward: Metadata = pairs
        .iter()
        .rev()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();

    let a = CacheKey::new("blog", "concise", forward, "gpt-4");
    let b = CacheKey::new("blog", "concise", backward, "gpt-4");
    assert_eq!(a.to_string(), b.to_string());
}
