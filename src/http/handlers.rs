//! HTTP request handlers
//!
//! The proxy endpoints plus health/debug. Handlers translate the inbound
//! request into core calls and map core failures to HTTP statuses:
//! unknown profile is the client's fault (404), upstream fetch and parse
//! trouble is a bad gateway, everything else is a 500.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProxyError;
use crate::fetch::DownloadError;
use crate::manifest::{build_master, build_media_playlist, RequestContext};
use crate::segment;
use crate::state::AppState;
use crate::url::{
    get_param, original_scheme, parse_query, remove_param, QueryPairs, UrlSigner,
};

use super::routes::{PLAYLIST_PATH, SEGMENT_PATH};

/// Playlist media type
const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    InternalError(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            HttpError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            HttpError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, body).into_response()
    }
}

impl From<ProxyError> for HttpError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::ProfileNotFound(id) => {
                HttpError::NotFound(format!("Profile not found: {}", id))
            }
            ProxyError::Download(e) => HttpError::BadGateway(e.to_string()),
            ProxyError::ManifestParse(e) => {
                HttpError::BadGateway(format!("upstream manifest invalid: {}", e))
            }
            other => HttpError::InternalError(other.to_string()),
        }
    }
}

impl From<DownloadError> for HttpError {
    fn from(err: DownloadError) -> Self {
        HttpError::BadGateway(err.to_string())
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("dash-hls-proxy v", env!("CARGO_PKG_VERSION"))
}

/// Debug endpoint - cache statistics
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.caches.stats();
    Json(serde_json::json!({
        "init_segment": stats.init_segment,
        "manifest": stats.manifest,
        "speedtest": stats.speedtest,
        "extractor": stats.extractor,
    }))
}

/// Master manifest endpoint
/// GET /proxy/mpd/manifest.m3u8?d=<source url>
pub async fn master_manifest(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let query = request_query(&uri, &*state.signer);
    let mpd_url = required_param(&query, "d")?;
    let forward = forward_headers(&query);

    let manifest = state
        .caches
        .get_cached_manifest(&*state.downloader, &state.parser, &mpd_url, &forward, true, None)
        .await?;

    // Explicit keys win over whatever the source manifest advertises.
    let key_id = non_empty_param(&query, "key_id").or_else(|| manifest.default_kid.clone());
    let key = non_empty_param(&query, "key");

    let ctx = request_context(&headers, query);
    let body = build_master(&manifest, &ctx, &*state.signer, key_id.as_deref(), key.as_deref());

    Ok(playlist_response(body))
}

/// Media playlist endpoint
/// GET /proxy/mpd/playlist.m3u8?d=<source url>&profile_id=<id>
pub async fn media_playlist(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let query = request_query(&uri, &*state.signer);
    let mpd_url = required_param(&query, "d")?;
    let profile_id = required_param(&query, "profile_id")?;
    let forward = forward_headers(&query);

    let manifest = state
        .caches
        .get_cached_manifest(
            &*state.downloader,
            &state.parser,
            &mpd_url,
            &forward,
            false,
            Some(&profile_id),
        )
        .await?;

    let matching = manifest.matching_profiles(&profile_id);
    if matching.is_empty() {
        return Err(ProxyError::ProfileNotFound(profile_id).into());
    }

    let ctx = request_context(&headers, query);
    let body = build_media_playlist(&manifest, &matching, &ctx, &*state.signer);

    Ok(playlist_response(body))
}

/// Segment endpoint
/// GET /proxy/mpd/segment.mp4?init_url=<url>&segment_url=<url>&mime_type=<mime>
pub async fn media_segment(
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> Result<Response, HttpError> {
    let query = request_query(&uri, &*state.signer);
    let init_url = required_param(&query, "init_url")?;
    let segment_url = required_param(&query, "segment_url")?;
    let mime_type = get_param(&query, "mime_type")
        .unwrap_or("video/mp4")
        .to_string();
    let forward = forward_headers(&query);

    let init = state
        .caches
        .get_cached_init_segment(&*state.downloader, &init_url, &forward)
        .await?;
    let media = state.downloader.download(&segment_url, &forward).await?;

    let key_id = non_empty_param(&query, "key_id");
    let key = non_empty_param(&query, "key");

    // Decrypt is CPU-bound; keep it off the scheduler threads.
    let decrypter = state.decrypter.clone();
    let mime = mime_type.clone();
    let body = tokio::task::spawn_blocking(move || {
        segment::assemble(
            &*decrypter,
            &init,
            &media,
            &mime,
            key_id.as_deref(),
            key.as_deref(),
        )
    })
    .await
    .map_err(|e| HttpError::InternalError(e.to_string()))??;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    Ok((headers, body).into_response())
}

fn playlist_response(body: String) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(HLS_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    (headers, body).into_response()
}

/// Inbound query pairs, with an opaque token unpacked when present.
fn request_query(uri: &Uri, signer: &dyn UrlSigner) -> QueryPairs {
    let mut pairs = parse_query(uri.query().unwrap_or(""));
    if let Some(token) = remove_param(&mut pairs, "token") {
        if let Some(mut unpacked) = signer.unsign(&token) {
            unpacked.extend(pairs);
            return unpacked;
        }
        tracing::warn!("rejecting unverifiable url token");
    }
    pairs
}

fn required_param(query: &[(String, String)], name: &str) -> Result<String, HttpError> {
    get_param(query, name)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HttpError::BadRequest(format!("missing query parameter: {}", name)))
}

fn non_empty_param(query: &[(String, String)], name: &str) -> Option<String> {
    get_param(query, name)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Headers forwarded downstream, carried as `h_`-prefixed query params.
fn forward_headers(query: &[(String, String)]) -> HashMap<String, String> {
    query
        .iter()
        .filter_map(|(name, value)| {
            name.strip_prefix("h_")
                .map(|header| (header.to_string(), value.clone()))
        })
        .collect()
}

/// Build the translator's request context: the inbound query plus absolute
/// endpoint bases carrying the client-facing scheme and host.
fn request_context(headers: &HeaderMap, query: QueryPairs) -> RequestContext {
    let scheme = original_scheme(headers);
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    RequestContext {
        query,
        playlist_base: format!("{}://{}{}", scheme, host, PLAYLIST_PATH),
        segment_base: format!("{}://{}{}", scheme, host, SEGMENT_PATH),
    }
}
