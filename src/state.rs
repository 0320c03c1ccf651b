//! Application state
//!
//! One instance per process, created at startup and shared by every
//! handler. Owns the named caches and the collaborator seams (downloader,
//! signer, decrypter); tearing it down drops the caches' memory tiers, the
//! file tiers are already durable.

use std::sync::Arc;

use crate::cache::Caches;
use crate::config::ServerConfig;
use crate::drm::{SegmentDecrypter, UnsupportedDecrypter};
use crate::error::Result;
use crate::fetch::{Downloader, HttpDownloader};
use crate::manifest::MpdParser;
use crate::url::{TokenSigner, UrlSigner};

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    pub caches: Caches,
    pub parser: MpdParser,
    pub downloader: Arc<dyn Downloader>,
    pub signer: Arc<dyn UrlSigner>,
    pub decrypter: Arc<dyn SegmentDecrypter>,
}

impl AppState {
    /// Build state with the bundled collaborators.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let caches = Caches::new(&config.cache)?;
        let downloader = Arc::new(HttpDownloader::new(&config.fetch));
        let signer = Arc::new(TokenSigner::new(
            config.url_signing_secret.clone().unwrap_or_default(),
        ));
        Ok(Self {
            config,
            caches,
            parser: MpdParser::new(),
            downloader,
            signer,
            decrypter: Arc::new(UnsupportedDecrypter),
        })
    }

    /// Build state with injected collaborators.
    pub fn with_collaborators(
        config: ServerConfig,
        caches: Caches,
        downloader: Arc<dyn Downloader>,
        signer: Arc<dyn UrlSigner>,
        decrypter: Arc<dyn SegmentDecrypter>,
    ) -> Self {
        Self {
            config,
            caches,
            parser: MpdParser::new(),
            downloader,
            signer,
            decrypter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_builds_with_defaults() {
        let state = AppState::new(ServerConfig::default()).unwrap();
        assert_eq!(state.caches.stats().init_segment.entry_count, 0);
    }
}
