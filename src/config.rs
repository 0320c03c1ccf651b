//! Server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy for a single named cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTierConfig {
    /// Directory name under the system temp dir (file tier only)
    pub dir_name: String,

    /// Time-to-live for cached entries in seconds
    pub ttl_secs: u64,

    /// Maximum memory usage in megabytes
    pub max_memory_mb: usize,
}

impl CacheTierConfig {
    /// Get maximum memory in bytes
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb * 1024 * 1024
    }

    /// Get the TTL as a Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Cache configuration for all named caches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Initialization segment cache (hybrid memory + file)
    pub init_segment: CacheTierConfig,

    /// Speed test result cache (hybrid memory + file)
    pub speedtest: CacheTierConfig,

    /// Extractor result cache (hybrid memory + file)
    pub extractor: CacheTierConfig,

    /// Memory cap for the parsed-manifest cache in megabytes.
    /// The manifest cache is memory-only; its TTL is derived per manifest.
    pub manifest_max_memory_mb: usize,

    /// Concurrent file operations per hybrid cache
    pub io_workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            init_segment: CacheTierConfig {
                dir_name: "init_segment_cache".to_string(),
                ttl_secs: 3600,
                max_memory_mb: 500,
            },
            speedtest: CacheTierConfig {
                dir_name: "speedtest_cache".to_string(),
                ttl_secs: 3600,
                max_memory_mb: 50,
            },
            extractor: CacheTierConfig {
                dir_name: "extractor_cache".to_string(),
                ttl_secs: 300,
                max_memory_mb: 50,
            },
            manifest_max_memory_mb: 100,
            io_workers: 4,
        }
    }
}

impl CacheConfig {
    /// Memory cap for the parsed-manifest cache in bytes
    pub fn manifest_max_memory_bytes(&self) -> usize {
        self.manifest_max_memory_mb * 1024 * 1024
    }
}

/// Downstream fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retry attempts after the initial request
    pub max_retries: u32,

    /// Base delay between retries in milliseconds (doubled per attempt)
    pub retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Downstream fetch configuration
    pub fetch: FetchConfig,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Secret used by the bundled URL signer
    pub url_signing_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            cors_enabled: true,
            log_level: "info".to_string(),
            url_signing_secret: None,
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
