//! Named caches
//!
//! One instance of each cache the proxy uses, owned by the application
//! state and injected into handlers. Policies (tier, TTL, memory cap) are
//! fixed per name; values go in as bytes with a typed codec on top.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, warn};

use super::hybrid::HybridCache;
use super::lru::{MemoryCache, MemoryCacheStats};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::fetch::{DownloadError, Downloader};
use crate::manifest::model::SourceManifest;
use crate::manifest::parser::{MpdDocument, MpdParser};

/// Fallback TTL for manifests that declare no update period (VOD)
const MANIFEST_DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// TTL for live manifests demanding continuous refresh
const MANIFEST_LIVE_FLOOR_TTL: Duration = Duration::from_secs(1);

/// Derive the cache TTL for a manifest from its declared minimum update
/// period in seconds.
pub fn derive_manifest_ttl(minimum_update_period: Option<f64>) -> Duration {
    match minimum_update_period {
        Some(mup) if mup > 0.0 => Duration::from_secs_f64(mup),
        Some(_) => MANIFEST_LIVE_FLOOR_TTL,
        None => MANIFEST_DEFAULT_TTL,
    }
}

/// A finished (or in-flight) speed test measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestRecord {
    pub task_id: String,
    pub url: String,
    pub bytes_transferred: u64,
    pub elapsed_secs: f64,
    pub completed: bool,
}

/// Aggregate statistics across the named caches
#[derive(Debug, Serialize)]
pub struct CachesStats {
    pub init_segment: MemoryCacheStats,
    pub manifest: MemoryCacheStats,
    pub speedtest: MemoryCacheStats,
    pub extractor: MemoryCacheStats,
}

/// The proxy's named caches
pub struct Caches {
    pub init_segment: HybridCache,
    pub manifest: MemoryCache,
    pub speedtest: HybridCache,
    pub extractor: HybridCache,
}

impl Caches {
    /// Build all caches under the system temp directory.
    pub fn new(config: &CacheConfig) -> std::io::Result<Self> {
        Self::with_base_dir(&std::env::temp_dir(), config)
    }

    /// Build all caches under an explicit base directory.
    pub fn with_base_dir(base: &Path, config: &CacheConfig) -> std::io::Result<Self> {
        Ok(Self {
            init_segment: HybridCache::with_dir(
                base.join(&config.init_segment.dir_name),
                config.init_segment.ttl(),
                config.init_segment.max_memory_bytes(),
                config.io_workers,
            )?,
            manifest: MemoryCache::new(
                config.manifest_max_memory_bytes(),
                MANIFEST_DEFAULT_TTL,
            ),
            speedtest: HybridCache::with_dir(
                base.join(&config.speedtest.dir_name),
                config.speedtest.ttl(),
                config.speedtest.max_memory_bytes(),
                config.io_workers,
            )?,
            extractor: HybridCache::with_dir(
                base.join(&config.extractor.dir_name),
                config.extractor.ttl(),
                config.extractor.max_memory_bytes(),
                config.io_workers,
            )?,
        })
    }

    /// Get an initialization segment, downloading on miss.
    pub async fn get_cached_init_segment(
        &self,
        downloader: &dyn Downloader,
        init_url: &str,
        headers: &HashMap<String, String>,
    ) -> std::result::Result<Bytes, DownloadError> {
        if let Some(cached) = self.init_segment.get(init_url).await {
            return Ok(cached);
        }

        let content = downloader.download(init_url, headers).await?;
        if !content.is_empty() {
            self.init_segment.set(init_url, content.clone(), None).await;
        }
        Ok(content)
    }

    /// Get a processed manifest, downloading and parsing on miss.
    ///
    /// The cache holds the raw parsed document; processing runs against the
    /// current request (clock, profile selection) on every hit, so live
    /// windows stay current between refetches.
    pub async fn get_cached_manifest(
        &self,
        downloader: &dyn Downloader,
        parser: &MpdParser,
        mpd_url: &str,
        headers: &HashMap<String, String>,
        parse_drm: bool,
        profile_id: Option<&str>,
    ) -> Result<SourceManifest> {
        if let Some(cached) = self.manifest.get(mpd_url) {
            match serde_json::from_slice::<MpdDocument>(&cached) {
                Ok(raw) => match parser.process(&raw, mpd_url, parse_drm, profile_id) {
                    Ok(manifest) => return Ok(manifest),
                    Err(e) => {
                        error!(mpd_url, "error processing cached manifest: {}, refetching", e);
                        self.manifest.delete(mpd_url);
                    }
                },
                Err(e) => {
                    warn!(mpd_url, "failed to decode cached manifest: {}, refetching", e);
                    self.manifest.delete(mpd_url);
                }
            }
        }

        let body = downloader.download(mpd_url, headers).await?;
        let raw = parser.parse(&body)?;
        let manifest = parser.process(&raw, mpd_url, parse_drm, profile_id)?;

        let ttl = derive_manifest_ttl(manifest.minimum_update_period);
        match serde_json::to_vec(&raw) {
            Ok(encoded) => {
                self.manifest.set(mpd_url, Bytes::from(encoded), Some(ttl));
            }
            Err(e) => error!(mpd_url, "error encoding manifest for cache: {}", e),
        }

        Ok(manifest)
    }

    /// Get a cached speed test record.
    pub async fn get_cached_speedtest(&self, task_id: &str) -> Option<SpeedTestRecord> {
        let cached = self.speedtest.get(task_id).await?;
        match serde_json::from_slice(&cached) {
            Ok(record) => Some(record),
            Err(e) => {
                error!(task_id, "error parsing cached speed test record: {}", e);
                self.speedtest.delete(task_id).await;
                None
            }
        }
    }

    /// Cache a speed test record.
    pub async fn set_cached_speedtest(&self, record: &SpeedTestRecord) -> bool {
        match serde_json::to_vec(record) {
            Ok(encoded) => {
                self.speedtest
                    .set(&record.task_id, Bytes::from(encoded), None)
                    .await
            }
            Err(e) => {
                error!("error encoding speed test record: {}", e);
                false
            }
        }
    }

    /// Get a cached extractor result.
    pub async fn get_cached_extractor_result(&self, key: &str) -> Option<serde_json::Value> {
        let cached = self.extractor.get(key).await?;
        match serde_json::from_slice(&cached) {
            Ok(value) => Some(value),
            Err(_) => {
                self.extractor.delete(key).await;
                None
            }
        }
    }

    /// Cache an extractor result.
    pub async fn set_cached_extractor_result(&self, key: &str, result: &serde_json::Value) -> bool {
        match serde_json::to_vec(result) {
            Ok(encoded) => self.extractor.set(key, Bytes::from(encoded), None).await,
            Err(e) => {
                error!("error encoding extractor result: {}", e);
                false
            }
        }
    }

    /// Memory-tier statistics for every named cache.
    pub fn stats(&self) -> CachesStats {
        CachesStats {
            init_segment: self.init_segment.stats(),
            manifest: self.manifest.stats(),
            speedtest: self.speedtest.stats(),
            extractor: self.extractor.stats(),
        }
    }
}
