// Result cache module

pub mod manager;
pub mod models;

pub use manager::ResultCache;
pub use models::{CacheConfig, CacheEntry, CacheKey, CacheStats, EvictionPolicy};
