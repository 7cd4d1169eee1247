//! Result cache keys, entries, configuration and statistics.

use crate::config::CacheSettings;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

const MIB: u64 = 1024 * 1024;

/// Content fingerprint of one synthesis request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprint `(text, model, voice)`.
    ///
    /// Each component is length-prefixed so that shifting characters between
    /// fields can never produce the same digest.
    pub fn new(text: &str, model: &str, voice: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [text, model, voice] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One cached synthesis result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub created_at: Instant,
    /// Always `payload.len()`.
    pub size: usize,
    pub model: String,
    pub voice: String,
    pub access_count: u64,
    pub last_access_at: Instant,
}

impl CacheEntry {
    pub fn new(payload: Bytes, model: &str, voice: &str, now: Instant) -> Self {
        Self {
            size: payload.len(),
            payload,
            created_at: now,
            model: model.to_string(),
            voice: voice.to_string(),
            access_count: 0,
            last_access_at: now,
        }
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }

    pub fn touch(&mut self, now: Instant) {
        self.access_count += 1;
        self.last_access_at = now;
    }
}

/// Which entry gives way when the cache is over budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed.
    #[default]
    Lru,
    /// Fewest accesses.
    Lfu,
    /// Oldest insertion.
    Fifo,
    /// Largest payload.
    Size,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Size => "size",
        };
        f.write_str(name)
    }
}

/// Runtime cache limits, in bytes and durations.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_items: usize,
    pub max_bytes: usize,
    pub max_item_bytes: usize,
    pub policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: Duration::from_secs(settings.ttl_secs),
            max_items: settings.max_items,
            max_bytes: (settings.max_size_mb * MIB) as usize,
            max_item_bytes: (settings.max_item_size_mb * MIB) as usize,
            policy: settings.eviction_policy,
        }
    }
}

/// Point-in-time view of cache usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub policy: String,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub stores: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Payloads refused for exceeding the per-item or total ceiling.
    pub rejections: u64,
    pub items: usize,
    pub max_items: usize,
    pub bytes: usize,
    pub max_bytes: usize,
    pub model_distribution: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_deterministic() {
        let a = CacheKey::new("Hello there", "en_GB-vctk-medium", "3");
        let b = CacheKey::new("Hello there", "en_GB-vctk-medium", "3");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);

        assert_ne!(a, CacheKey::new("Hello there", "en_GB-vctk-medium", "4"));
        assert_ne!(a, CacheKey::new("Hello there", "en_US-lessac-high", "3"));
    }

    #[test]
    fn test_cache_key_field_boundaries() {
        // Same concatenation, different split
        assert_ne!(CacheKey::new("ab", "c", "d"), CacheKey::new("a", "bc", "d"));
    }

    #[test]
    fn test_settings_conversion() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.max_bytes, 500 * 1024 * 1024);
        assert_eq!(config.max_item_bytes, 10 * 1024 * 1024);
        assert_eq!(config.policy, EvictionPolicy::Lru);
    }

    #[test]
    fn test_policy_parses_lowercase() {
        let policy: EvictionPolicy = serde_json::from_str("\"fifo\"").unwrap();
        assert_eq!(policy, EvictionPolicy::Fifo);
        assert!(serde_json::from_str::<EvictionPolicy>("\"random\"").is_err());
    }
}
