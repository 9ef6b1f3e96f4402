//! Exact in-process cache backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::content::{CachedContent, expiry_after};
use super::{CacheBackend, CacheStats};
use crate::telemetry;
use crate::{HuginnError, Result};

const BACKEND: &str = "memory";

/// Creation order: timestamp, then insertion sequence for equal timestamps.
type AgeKey = (DateTime<Utc>, u64);

struct Slot {
    content: CachedContent,
    age: AgeKey,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Slot>,
    by_age: BTreeMap<AgeKey, String>,
    next_sequence: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CachedContent> {
        let slot = self.entries.remove(key)?;
        self.by_age.remove(&slot.age);
        Some(slot.content)
    }

    /// Drop `key` if its entry has expired. Returns true if a live entry
    /// remains.
    fn retain_live(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let expired = match self.entries.get(key) {
            None => return false,
            Some(slot) => slot.content.is_expired_at(now),
        };
        if expired {
            self.remove(key);
            debug!(key, "expired cache entry removed");
        }
        !expired
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.by_age.pop_first() {
            self.entries.remove(&key);
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "backend" => BACKEND).increment(1);
            debug!(key = %key, "evicted oldest cache entry");
        }
    }
}

/// Mutex-guarded map with lazy expiry and oldest-first eviction.
///
/// When a new key would push the cache past `max_entries`, the entry with
/// the smallest `created_at` is evicted first (not least-recently-used).
/// Expired entries are removed when they are next looked up.
pub struct MemoryCacheBackend {
    state: Mutex<CacheState>,
    max_entries: u64,
}

impl MemoryCacheBackend {
    /// A cache holding at most `max_entries` (at least one).
    pub fn new(max_entries: u64) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| HuginnError::lock_poisoned("memory cache"))
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new(super::CacheConfig::default().max_entries)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> Result<Option<CachedContent>> {
        let mut state = self.lock()?;
        if !state.retain_live(key, Utc::now()) {
            state.misses += 1;
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "backend" => BACKEND).increment(1);
            return Ok(None);
        }
        state.hits += 1;
        let found = state.entries.get_mut(key).map(|slot| {
            slot.content.hit_count += 1;
            slot.content.clone()
        });
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "backend" => BACKEND).increment(1);
        Ok(found)
    }

    async fn set(&self, key: &str, mut content: CachedContent, ttl: Option<Duration>) -> Result<()> {
        if let Some(ttl) = ttl {
            content.expires_at = expiry_after(ttl);
        }
        let mut state = self.lock()?;
        let replaced = state.remove(key).is_some();
        if !replaced && state.entries.len() as u64 >= self.max_entries {
            state.evict_oldest();
        }

        let age = (content.created_at, state.next_sequence);
        state.next_sequence += 1;
        state.by_age.insert(age, key.to_owned());
        state.entries.insert(key.to_owned(), Slot { content, age });
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state.retain_live(key, Utc::now()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.entries.clear();
        state.by_age.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let state = self.lock()?;
        Ok(CacheStats {
            size: state.entries.len() as u64,
            capacity: self.max_entries,
            hit_count: state.hits,
            miss_count: state.misses,
        })
    }
}
