//! Bounded LRU memory store
//!
//! Byte-capped key/value store with recency eviction and expiry-on-read.
//! A single mutex guards the recency order, so concurrent readers of the
//! same key always observe a consistent `access_count`.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime};

/// Cache entry with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub expires_at: SystemTime,
    pub access_count: u64,
    pub last_access: SystemTime,
}

impl CacheEntry {
    pub fn new(payload: Bytes, ttl: Duration) -> Self {
        let now = SystemTime::now();
        Self {
            payload,
            expires_at: now + ttl,
            access_count: 0,
            last_access: now,
        }
    }

    /// Entry size in bytes. Derived from the payload so it cannot diverge.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_fresh(&self, now: SystemTime) -> bool {
        now < self.expires_at
    }
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    current_size: usize,
}

/// Byte-capped LRU store
pub struct LruMemoryCache {
    max_size: usize,
    inner: Mutex<Inner>,
}

impl LruMemoryCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                current_size: 0,
            }),
        }
    }

    /// Look up a key. A fresh hit becomes most-recent and bumps its
    /// access count; a stale hit is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let now = SystemTime::now();

        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.is_fresh(now) {
                entry.access_count += 1;
                entry.last_access = now;
                return Some(entry.clone());
            }
        }
        // Expired (or absent): drop any stored entry.
        if let Some(stale) = inner.entries.pop(key) {
            inner.current_size -= stale.size();
        }
        None
    }

    /// Insert a key as most-recent, evicting least-recent entries until the
    /// new total fits the byte cap. An entry larger than the cap itself is
    /// still inserted after evicting everything else; the cap is exceeded
    /// only by that single entry until it is replaced or removed.
    pub fn set(&self, key: String, entry: CacheEntry) {
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.pop(&key) {
            inner.current_size -= old.size();
        }

        while inner.current_size + entry.size() > self.max_size && !inner.entries.is_empty() {
            if let Some((_, evicted)) = inner.entries.pop_lru() {
                inner.current_size -= evicted.size();
            }
        }

        inner.current_size += entry.size();
        inner.entries.put(key, entry);
    }

    /// Remove a key. No-op when absent.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.pop(key) {
            inner.current_size -= entry.size();
        }
    }

    /// Current total payload bytes
    pub fn current_size(&self) -> usize {
        self.inner.lock().current_size
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> MemoryCacheStats {
        let inner = self.inner.lock();
        MemoryCacheStats {
            entry_count: inner.entries.len(),
            total_size_bytes: inner.current_size,
            memory_limit_bytes: self.max_size,
        }
    }
}

/// Cache statistics
#[derive(Debug, serde::Serialize)]
pub struct MemoryCacheStats {
    pub entry_count: usize,
    pub total_size_bytes: usize,
    pub memory_limit_bytes: usize,
}

/// Memory-only cache facade with a default TTL.
///
/// Same store as the hybrid cache's fast tier, without a file tier behind
/// it. Used for values that must be re-derived per process anyway.
pub struct MemoryCache {
    store: LruMemoryCache,
    default_ttl: Duration,
}

impl MemoryCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            store: LruMemoryCache::new(max_size),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.store.get(key).map(|entry| entry.payload)
    }

    pub fn set(&self, key: &str, payload: Bytes, ttl: Option<Duration>) -> bool {
        let entry = CacheEntry::new(payload, ttl.unwrap_or(self.default_ttl));
        self.store.set(key.to_string(), entry);
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.remove(key);
        true
    }

    pub fn stats(&self) -> MemoryCacheStats {
        self.store.stats()
    }
}
