//! HTTP server module
//!
//! - Axum router with the proxy endpoints
//! - Request handlers for manifests, playlists, and segments
//! - HTTP error mapping (profile-not-found → 404, upstream faults → 5xx)
//! - CORS and request tracing middleware

pub mod handlers;
pub mod routes;

pub use routes::{create_router, MANIFEST_PATH, PLAYLIST_PATH, SEGMENT_PATH};
