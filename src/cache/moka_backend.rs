//! Cache backend on top of `moka::future::Cache`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use moka::Expiry;
use moka::future::Cache;
use moka::notification::RemovalCause;

use super::content::{CachedContent, expiry_after};
use super::{CacheBackend, CacheStats};
use crate::Result;
use crate::telemetry;

const BACKEND: &str = "moka";

struct MokaEntry {
    content: CachedContent,
    hits: AtomicU64,
}

/// Per-entry expiry read from `CachedContent::expires_at`.
struct ContentExpiry;

impl ContentExpiry {
    fn remaining(entry: &MokaEntry) -> Option<Duration> {
        let expires_at = entry.content.expires_at?;
        Some((expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

impl Expiry<String, Arc<MokaEntry>> for ContentExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<MokaEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Self::remaining(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<MokaEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::remaining(value)
    }
}

/// Concurrent cache backend using moka.
///
/// Expiry is exact per entry. Capacity is enforced by moka's TinyLFU
/// policy, so the evicted entry is not necessarily the oldest one, and
/// the bound is applied asynchronously (the size may briefly exceed
/// `max_entries` until pending maintenance runs). Use
/// [`MemoryCacheBackend`](super::MemoryCacheBackend) where strict
/// oldest-first eviction matters.
pub struct MokaCacheBackend {
    cache: Cache<String, Arc<MokaEntry>>,
    max_entries: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MokaCacheBackend {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(ContentExpiry)
            .eviction_listener(|_key, _value, cause| {
                if cause == RemovalCause::Size {
                    metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "backend" => BACKEND)
                        .increment(1);
                }
            })
            .build();
        Self {
            cache,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "backend" => BACKEND).increment(1);
    }
}

#[async_trait]
impl CacheBackend for MokaCacheBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> Result<Option<CachedContent>> {
        let Some(entry) = self.cache.get(key).await else {
            self.record_miss();
            return Ok(None);
        };
        // moka expires lazily on its own schedule; never serve a stale entry.
        if entry.content.is_expired() {
            self.cache.invalidate(key).await;
            self.record_miss();
            return Ok(None);
        }
        let hits = entry.hits.fetch_add(1, Ordering::Relaxed) + 1;
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "backend" => BACKEND).increment(1);

        let mut content = entry.content.clone();
        content.hit_count = hits;
        Ok(Some(content))
    }

    async fn set(&self, key: &str, mut content: CachedContent, ttl: Option<Duration>) -> Result<()> {
        if let Some(ttl) = ttl {
            content.expires_at = expiry_after(ttl);
        }
        let entry = MokaEntry {
            hits: AtomicU64::new(content.hit_count),
            content,
        };
        self.cache.insert(key.to_owned(), Arc::new(entry)).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .cache
            .get(key)
            .await
            .is_some_and(|entry| !entry.content.is_expired()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.cache.run_pending_tasks().await;
        Ok(CacheStats {
            size: self.cache.entry_count(),
            capacity: self.max_entries,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        })
    }
}
