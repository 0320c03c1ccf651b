//! Caching
//!
//! Three layers, composed bottom-up:
//! - a byte-capped LRU memory store with expiry-on-read
//! - a hybrid cache pairing that store with a durable file tier
//! - named caches with fixed policies and typed codecs on the values

pub mod facades;
pub mod hybrid;
pub mod lru;

pub use facades::{derive_manifest_ttl, Caches, SpeedTestRecord};
pub use hybrid::HybridCache;
pub use lru::{CacheEntry, LruMemoryCache, MemoryCache};
