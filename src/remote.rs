//! Remote ETag lookup.

use crate::checksum::strip_quotes;
use crate::error::{RemoteError, VerifyError};
use crate::types::VerifyConfig;
use reqwest::{StatusCode, Url};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn};

/// Anything that can report the ETag of a stored object.
pub trait FingerprintSource {
    /// Returns the object's ETag with any `"` quoting removed.
    fn fingerprint(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;
}

/// Looks up ETags with HEAD requests against an S3-compatible endpoint (path-style URLs).
#[derive(Debug, Clone)]
pub struct HttpFingerprintSource {
    client: reqwest::Client,
    endpoint: Url,
    max_retries: usize,
    retry_interval: Duration,
}

impl HttpFingerprintSource {
    pub fn new(config: &VerifyConfig) -> Result<Self, VerifyError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            RemoteError::Transport(format!("Invalid endpoint {}: {}", config.endpoint, e))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(RemoteError::Transport(format!(
                "Invalid endpoint {}: not a base URL",
                config.endpoint
            ))
            .into());
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            max_retries: config.max_retries,
            retry_interval: config.retry_interval,
        })
    }

    /// `{endpoint}/{bucket}/{key}` with each key segment percent-encoded.
    pub fn object_url(&self, bucket: &str, key: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(bucket).extend(key.split('/'));
        }
        url
    }

    async fn head_etag(&self, bucket: &str, key: &str) -> Result<String, RemoteError> {
        let url = self.object_url(bucket, key);
        debug!("HEAD {}", url);

        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("Failed to connect to {}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            return Err(RemoteError::Transport(format!(
                "HEAD request for {} returned HTTP {}",
                url, status
            )));
        }

        response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| strip_quotes(s).to_string())
            .ok_or_else(|| RemoteError::Transport(format!("No ETag header returned for {}", url)))
    }
}

impl FingerprintSource for HttpFingerprintSource {
    async fn fingerprint(&self, bucket: &str, key: &str) -> Result<String, RemoteError> {
        let retry_strategy =
            tokio_retry2::strategy::FixedInterval::from_millis(self.retry_interval.as_millis() as u64)
                .take(self.max_retries);

        Retry::spawn(retry_strategy, || async move {
            match self.head_etag(bucket, key).await {
                Ok(etag) => Ok(etag),
                Err(e @ RemoteError::NotFound { .. }) => Err(RetryError::Permanent(e)),
                Err(e) => {
                    warn!("ETag lookup for {} failed: {}", key, e);
                    RetryError::to_transient(e)
                }
            }
        })
        .await
    }
}

/// ETags held in memory, keyed by bucket and key.
#[derive(Debug, Default)]
pub struct MemoryFingerprintSource {
    etags: HashMap<(String, String), String>,
    lookups: AtomicUsize,
}

impl MemoryFingerprintSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bucket: &str, key: &str, etag: impl Into<String>) {
        self.etags
            .insert((bucket.to_string(), key.to_string()), etag.into());
    }

    /// Number of lookups served so far, found or not.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl FingerprintSource for MemoryFingerprintSource {
    async fn fingerprint(&self, bucket: &str, key: &str) -> Result<String, RemoteError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.etags
            .get(&(bucket.to_string(), key.to_string()))
            .map(|etag| strip_quotes(etag).to_string())
            .ok_or_else(|| RemoteError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}
