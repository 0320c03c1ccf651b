use thiserror::Error;

use crate::drm::DecryptError;
use crate::fetch::DownloadError;

/// Main error type for the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    #[error("manifest parse error: {0}")]
    ManifestParse(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("decrypt error: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ProxyError>;
