//! Streaming media proxy core
//!
//! Rewrites DASH manifests into HLS playlists and serves the referenced
//! media segments, with a hybrid memory/file cache between the proxy and
//! the origin. DRM decryption and URL signing are pluggable seams.

pub mod cache;
pub mod config;
pub mod drm;
pub mod error;
pub mod fetch;
pub mod http;
pub mod manifest;
pub mod segment;
pub mod state;
pub mod url;

pub use config::ServerConfig;
pub use error::{ProxyError, Result};
pub use state::AppState;
