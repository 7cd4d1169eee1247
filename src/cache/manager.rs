// Result cache - TTL and size bounded store of synthesized audio

use crate::cache::models::{CacheConfig, CacheEntry, CacheKey, CacheStats, EvictionPolicy};
use crate::metrics;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Sum of `size` over `entries`.
    total_bytes: usize,
    hits: u64,
    misses: u64,
    stores: u64,
    evictions: u64,
    expirations: u64,
    rejections: u64,
}

impl CacheState {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size;
        Some(entry)
    }

    fn select_victim(&self, policy: EvictionPolicy) -> Option<CacheKey> {
        let entries = self.entries.iter();
        let victim = match policy {
            EvictionPolicy::Lru => entries.min_by_key(|(_, e)| e.last_access_at),
            EvictionPolicy::Lfu => entries.min_by_key(|(_, e)| e.access_count),
            EvictionPolicy::Fifo => entries.min_by_key(|(_, e)| e.created_at),
            EvictionPolicy::Size => entries.max_by_key(|(_, e)| e.size),
        };
        victim.map(|(key, _)| key.clone())
    }

    /// Evict exactly one entry. Returns false when the cache is empty.
    fn evict_one(&mut self, policy: EvictionPolicy) -> bool {
        let Some(key) = self.select_victim(policy) else {
            return false;
        };
        if let Some(entry) = self.remove(&key) {
            debug!(key = key.short(), size = entry.size, %policy, "Evicted cache entry");
            self.evictions += 1;
            metrics::record_cache_op("evict");
        }
        true
    }

    /// Make room for an entry of `new_size` bytes.
    fn ensure_capacity(&mut self, new_size: usize, config: &CacheConfig) -> usize {
        let mut evicted = 0;
        while self.entries.len() >= config.max_items && self.evict_one(config.policy) {
            evicted += 1;
        }
        while self.total_bytes + new_size > config.max_bytes && self.evict_one(config.policy) {
            evicted += 1;
        }
        evicted
    }

    /// Bring the cache back within budget without reserving room.
    fn enforce_budget(&mut self, config: &CacheConfig) -> usize {
        let mut evicted = 0;
        while self.entries.len() > config.max_items && self.evict_one(config.policy) {
            evicted += 1;
        }
        while self.total_bytes > config.max_bytes && self.evict_one(config.policy) {
            evicted += 1;
        }
        evicted
    }

    fn publish_usage(&self) {
        metrics::update_cache_usage(self.entries.len(), self.total_bytes);
    }
}

/// Content-addressed cache of synthesis results.
///
/// All state sits behind one mutex so the serving path and the background
/// cleanup loop never interleave mutations.
pub struct ResultCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        info!(
            enabled = config.enabled,
            ttl_secs = config.ttl.as_secs(),
            max_items = config.max_items,
            max_bytes = config.max_bytes,
            policy = %config.policy,
            "Result cache initialized"
        );
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fetch a live entry, dropping it if its TTL has passed.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !self.config.enabled {
            state.misses += 1;
            return None;
        }

        let now = Instant::now();
        let expired = match state.entries.get_mut(key) {
            None => false,
            Some(entry) if entry.is_expired(now, self.config.ttl) => true,
            Some(entry) => {
                entry.touch(now);
                let payload = entry.payload.clone();
                state.hits += 1;
                metrics::record_cache_op("hit");
                debug!(key = key.short(), "Cache hit");
                return Some(payload);
            }
        };

        if expired {
            state.remove(key);
            state.expirations += 1;
            metrics::record_cache_op("expire");
            state.publish_usage();
            debug!(key = key.short(), "Cache entry expired on lookup");
        }
        state.misses += 1;
        metrics::record_cache_op("miss");
        None
    }

    /// Cache lookup by request components.
    pub fn lookup(&self, text: &str, model: &str, voice: &str) -> Option<Bytes> {
        self.get(&CacheKey::new(text, model, voice))
    }

    /// Insert a payload, evicting per policy to stay within budget.
    ///
    /// Returns whether the payload was stored. Oversized payloads are counted
    /// as rejections, never reported as errors.
    pub fn put(&self, key: CacheKey, payload: Bytes, model: &str, voice: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let size = payload.len();
        let mut state = self.state.lock();
        if size == 0 {
            debug!(key = key.short(), "Refusing to cache empty payload");
            return false;
        }
        if size > self.config.max_item_bytes || size > self.config.max_bytes {
            state.rejections += 1;
            metrics::record_cache_op("reject");
            debug!(
                key = key.short(),
                size,
                limit = self.config.max_item_bytes,
                "Payload too large to cache"
            );
            return false;
        }

        state.remove(&key);
        state.ensure_capacity(size, &self.config);

        let entry = CacheEntry::new(payload, model, voice, Instant::now());
        state.total_bytes += size;
        state.entries.insert(key, entry);
        state.stores += 1;
        metrics::record_cache_op("store");
        state.publish_usage();
        true
    }

    /// Cache store by request components.
    pub fn store(&self, text: &str, model: &str, voice: &str, payload: Bytes) -> bool {
        self.put(CacheKey::new(text, model, voice), payload, model, voice)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut state = self.state.lock();
        let removed = state.remove(key).is_some();
        if removed {
            state.publish_usage();
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.total_bytes = 0;
        state.publish_usage();
        info!(count, "Result cache cleared");
    }

    /// Sweep expired entries, then re-apply the item and byte budgets.
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();
        let ttl = self.config.ttl;

        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
            metrics::record_cache_op("expire");
        }
        state.expirations += expired.len() as u64;

        let evicted = state.enforce_budget(&self.config);
        state.publish_usage();

        let removed = expired.len() + evicted;
        if removed > 0 {
            info!(expired = expired.len(), evicted, "Cache cleanup completed");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;

        let mut model_distribution = BTreeMap::new();
        for entry in state.entries.values() {
            *model_distribution.entry(entry.model.clone()).or_insert(0) += 1;
        }

        CacheStats {
            enabled: self.config.enabled,
            policy: self.config.policy.to_string(),
            hits: state.hits,
            misses: state.misses,
            hit_rate: state.hits as f64 / lookups.max(1) as f64,
            stores: state.stores,
            evictions: state.evictions,
            expirations: state.expirations,
            rejections: state.rejections,
            items: state.entries.len(),
            max_items: self.config.max_items,
            bytes: state.total_bytes,
            max_bytes: self.config.max_bytes,
            model_distribution,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }
}
