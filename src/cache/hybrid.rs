//! Hybrid memory + file cache
//!
//! Combines the bounded LRU store with a durable file tier. The memory
//! tier absorbs hot keys; the file tier survives restarts and holds large,
//! rarely-changing artifacts such as initialization segments.
//!
//! On-disk layout per entry: an 8-byte big-endian metadata length, a JSON
//! metadata object, then the raw payload. Writes go to a `.tmp` sibling and
//! are renamed into place, so readers see either the old file, the new
//! file, or nothing — never a torn frame.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::lru::{CacheEntry, LruMemoryCache, MemoryCacheStats};

/// Framed metadata stored ahead of the payload
#[derive(Debug, Serialize, Deserialize)]
struct FileMetadata {
    expires_at: f64,
    access_count: u64,
    last_access: f64,
}

fn epoch_secs(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn from_epoch_secs(secs: f64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs_f64(secs.max(0.0))
}

/// Map a logical key to its stable hashed form, shared by the memory tier
/// and the file name.
pub fn hashed_key(key: &str) -> String {
    format!("{:x}", md5::compute(key.as_bytes()))
}

/// Hybrid memory + file cache
pub struct HybridCache {
    cache_dir: PathBuf,
    default_ttl: Duration,
    memory: LruMemoryCache,
    io_permits: Semaphore,
}

impl HybridCache {
    /// Create a cache whose file tier lives under the system temp directory.
    pub fn new(
        dir_name: &str,
        default_ttl: Duration,
        max_memory_size: usize,
        io_workers: usize,
    ) -> std::io::Result<Self> {
        Self::with_dir(
            std::env::temp_dir().join(dir_name),
            default_ttl,
            max_memory_size,
            io_workers,
        )
    }

    /// Create a cache rooted at an explicit directory.
    pub fn with_dir(
        cache_dir: PathBuf,
        default_ttl: Duration,
        max_memory_size: usize,
        io_workers: usize,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            default_ttl,
            memory: LruMemoryCache::new(max_memory_size),
            io_permits: Semaphore::new(io_workers.max(1)),
        })
    }

    fn file_path(&self, hashed: &str) -> PathBuf {
        self.cache_dir.join(hashed)
    }

    /// Get a value, trying memory first, then the file tier.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let hashed = hashed_key(key);

        if let Some(entry) = self.memory.get(&hashed) {
            return Some(entry.payload);
        }

        let path = self.file_path(&hashed);
        let buf = {
            let _permit = self.io_permits.acquire().await.ok()?;
            match tokio::fs::read(&path).await {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
                Err(e) => {
                    error!("error reading from cache {}: {}", path.display(), e);
                    return None;
                }
            }
        };

        let (metadata, payload) = match parse_frame(&buf) {
            Some(parsed) => parsed,
            None => {
                warn!("corrupt cache file {}, discarding", path.display());
                self.remove_file(&path).await;
                return None;
            }
        };

        let now = SystemTime::now();
        if from_epoch_secs(metadata.expires_at) <= now {
            debug!("cache file {} expired, discarding", path.display());
            self.remove_file(&path).await;
            return None;
        }

        let entry = CacheEntry {
            payload: payload.clone(),
            expires_at: from_epoch_secs(metadata.expires_at),
            access_count: metadata.access_count + 1,
            last_access: now,
        };
        self.memory.set(hashed, entry);

        Some(payload)
    }

    /// Set a value in both tiers. Returns false when the file tier write
    /// fails; the memory tier is updated regardless.
    pub async fn set(&self, key: &str, payload: Bytes, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = SystemTime::now();
        let expires_at = now + ttl;

        let hashed = hashed_key(key);
        self.memory
            .set(hashed.clone(), CacheEntry::new(payload.clone(), ttl));

        let metadata = FileMetadata {
            expires_at: epoch_secs(expires_at),
            access_count: 0,
            last_access: epoch_secs(now),
        };
        let metadata_bytes = match serde_json::to_vec(&metadata) {
            Ok(b) => b,
            Err(e) => {
                error!("error encoding cache metadata: {}", e);
                return false;
            }
        };

        let mut frame = Vec::with_capacity(8 + metadata_bytes.len() + payload.len());
        frame.extend_from_slice(&(metadata_bytes.len() as u64).to_be_bytes());
        frame.extend_from_slice(&metadata_bytes);
        frame.extend_from_slice(&payload);

        let path = self.file_path(&hashed);
        let tmp_path = path.with_extension("tmp");

        let _permit = match self.io_permits.acquire().await {
            Ok(p) => p,
            Err(_) => return false,
        };
        if let Err(e) = tokio::fs::write(&tmp_path, &frame).await {
            error!("error writing to cache {}: {}", tmp_path.display(), e);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return false;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            error!("error committing cache file {}: {}", path.display(), e);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return false;
        }
        true
    }

    /// Delete a key from both tiers. An absent file counts as success.
    pub async fn delete(&self, key: &str) -> bool {
        let hashed = hashed_key(key);
        self.memory.remove(&hashed);

        let path = self.file_path(&hashed);
        let _permit = match self.io_permits.acquire().await {
            Ok(p) => p,
            Err(_) => return false,
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                error!("error deleting from cache {}: {}", path.display(), e);
                false
            }
        }
    }

    async fn remove_file(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!("error deleting cache file {}: {}", path.display(), e);
            }
        }
    }

    /// Memory-tier statistics
    pub fn stats(&self) -> MemoryCacheStats {
        self.memory.stats()
    }
}

fn parse_frame(buf: &[u8]) -> Option<(FileMetadata, Bytes)> {
    if buf.len() < 8 {
        return None;
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&buf[..8]);
    let metadata_len = u64::from_be_bytes(len_bytes) as usize;
    if buf.len() < 8 + metadata_len {
        return None;
    }
    let metadata: FileMetadata = serde_json::from_slice(&buf[8..8 + metadata_len]).ok()?;
    let payload = Bytes::copy_from_slice(&buf[8 + metadata_len..]);
    Some((metadata, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_cache(dir: &tempfile::TempDir) -> HybridCache {
        HybridCache::with_dir(
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
            1024 * 1024,
            4,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir);

        assert!(cache.set("key", Bytes::from("payload"), None).await);
        assert_eq!(cache.get("key").await.unwrap(), Bytes::from("payload"));
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir);
        assert!(cache.get("absent").await.is_none());
    }

    #[tokio::test]
    async fn test_file_tier_survives_memory_loss() {
        let dir = tempdir().unwrap();
        {
            let cache = test_cache(&dir);
            assert!(cache.set("key", Bytes::from("durable"), None).await);
        }
        // Fresh instance: memory tier empty, file tier intact.
        let cache = test_cache(&dir);
        assert_eq!(cache.get("key").await.unwrap(), Bytes::from("durable"));
    }

    #[tokio::test]
    async fn test_file_read_increments_access_count() {
        let dir = tempdir().unwrap();
        {
            let cache = test_cache(&dir);
            cache.set("key", Bytes::from("x"), None).await;
        }
        let cache = test_cache(&dir);
        cache.get("key").await.unwrap();
        // File fill-through stored access_count = persisted + 1 = 1; the
        // memory read below makes it 2.
        let entry = cache.memory.get(&hashed_key("key")).unwrap();
        assert_eq!(entry.access_count, 2);
    }

    #[tokio::test]
    async fn test_expired_file_deleted_on_read() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir);
        assert!(cache.set("key", Bytes::from("x"), Some(Duration::ZERO)).await);
        // Memory tier also stored it expired, so both tiers miss.
        assert!(cache.get("key").await.is_none());
        assert!(!dir.path().join(hashed_key("key")).exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_treated_as_miss() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir);
        let path = dir.path().join(hashed_key("key"));
        std::fs::write(&path, b"short").unwrap();

        assert!(cache.get("key").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_truncated_metadata_treated_as_miss() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir);
        let path = dir.path().join(hashed_key("key"));
        // Claims 1000 metadata bytes but provides 4.
        let mut frame = 1000u64.to_be_bytes().to_vec();
        frame.extend_from_slice(b"{\"a\"");
        std::fs::write(&path, &frame).unwrap();

        assert!(cache.get("key").await.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir);
        cache.set("key", Bytes::from("x"), None).await;

        assert!(cache.delete("key").await);
        assert!(cache.get("key").await.is_none());
        // Deleting an absent key still succeeds.
        assert!(cache.delete("key").await);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_file_atomically() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir);
        cache.set("key", Bytes::from("old"), None).await;
        cache.set("key", Bytes::from("new"), None).await;

        assert_eq!(cache.get("key").await.unwrap(), Bytes::from("new"));
        // No stray tmp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_orphan_tmp_never_referenced() {
        // A crash between tmp write and rename leaves the prior value
        // untouched: readers only ever open the final path.
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir);
        cache.set("key", Bytes::from("committed"), None).await;

        let tmp = dir.path().join(hashed_key("key")).with_extension("tmp");
        std::fs::write(&tmp, b"partial garbage").unwrap();

        assert_eq!(cache.get("key").await.unwrap(), Bytes::from("committed"));
    }

    #[test]
    fn test_hashed_key_is_md5_hex() {
        // Well-known digest of the empty string.
        assert_eq!(hashed_key(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hashed_key("abc").len(), 32);
    }

    #[test]
    fn test_parse_frame_rejects_short_buffers() {
        assert!(parse_frame(b"").is_none());
        assert!(parse_frame(b"1234").is_none());
    }
}
