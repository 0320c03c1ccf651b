//! Downstream HTTP fetching
//!
//! Defines the download collaborator used by the cache and segment paths,
//! plus a reqwest-backed implementation with retry and backoff.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::FetchConfig;

/// Downstream fetch failure
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Download collaborator. Returns the full response body.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Bytes, DownloadError>;
}

/// Reqwest-backed downloader with exponential-backoff retry.
///
/// Connection errors, timeouts, and 5xx responses are retried; any other
/// failure is surfaced immediately.
pub struct HttpDownloader {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpDownloader {
    pub fn new(config: &FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    fn is_retryable(err: &DownloadError) -> bool {
        match err {
            DownloadError::Request { source, .. } => {
                source.is_connect() || source.is_timeout() || source.is_request()
            }
            DownloadError::Status { status, .. } => *status >= 500,
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Bytes, DownloadError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Bytes, DownloadError> {
        let mut delay = self.retry_delay;
        let mut attempt = 0u32;

        loop {
            match self.fetch_once(url, headers).await {
                Ok(bytes) => {
                    debug!(url, size = bytes.len(), "downloaded");
                    return Ok(bytes);
                }
                Err(err) if attempt < self.max_retries && Self::is_retryable(&err) => {
                    warn!(url, attempt, "retrying download: {}", err);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_is_retryable_for_5xx_only() {
        let server_err = DownloadError::Status {
            url: "http://u".to_string(),
            status: 503,
        };
        let client_err = DownloadError::Status {
            url: "http://u".to_string(),
            status: 404,
        };
        assert!(HttpDownloader::is_retryable(&server_err));
        assert!(!HttpDownloader::is_retryable(&client_err));
    }

    #[test]
    fn test_error_display_carries_url() {
        let err = DownloadError::Status {
            url: "http://example.com/seg.m4s".to_string(),
            status: 502,
        };
        let text = err.to_string();
        assert!(text.contains("http://example.com/seg.m4s"));
        assert!(text.contains("502"));
    }
}
