//! Outbound HTTP for the tracker.
//!
//! [`Fetcher`] issues single-attempt GET requests through an [`HttpClient`],
//! routing requests bound to rate-limited hosts (code-hosting APIs) through
//! a shared [`RateLimiter`] first. Every wait observes the worker pool's
//! cancellation token.

use crate::traits::{HttpClient, HttpClientError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Errors returned by [`Fetcher`].
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection failure, timeout or unreadable body.
    #[error("error getting {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The server answered with a non-2xx status.
    #[error("unexpected status code getting {url}: {status}")]
    Status { url: String, status: u16 },

    /// The request was abandoned because the tracker is shutting down.
    #[error("request to {url} cancelled")]
    Cancelled { url: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limiter wait cancelled")]
    Cancelled,
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Token bucket shared by every worker.
///
/// `wait` blocks until a token is available or the cancellation token
/// fires. An unlimited limiter admits every request immediately.
#[derive(Debug)]
pub struct RateLimiter {
    /// Tokens added per second; `None` means unlimited.
    per_second: Option<f64>,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter admitting `requests_per_hour` requests, with up to
    /// `burst` requests admitted back to back.
    pub fn new(requests_per_hour: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            per_second: Some(f64::from(requests_per_hour.max(1)) / 3600.0),
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            per_second: None,
            capacity: 0.0,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        if cancel.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }
        let Some(per_second) = self.per_second else {
            return Ok(());
        };

        loop {
            let delay = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * per_second).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / per_second)
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

// ============================================================================
// Fetcher
// ============================================================================

pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    limiter: Arc<RateLimiter>,
    rate_limited_hosts: Vec<String>,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn HttpClient>,
        limiter: Arc<RateLimiter>,
        rate_limited_hosts: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            limiter,
            rate_limited_hosts,
            cancel,
        }
    }

    /// Fetches a required resource. Any non-2xx status is an error.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let res = self.get(url).await?;
        if !res.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: res.status().as_u16(),
            });
        }
        Ok(res.into_body())
    }

    /// Fetches an optional resource: a 404 is reported as `Ok(None)`.
    pub async fn fetch_optional(&self, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let res = self.get(url).await?;
        if res.status() == http::StatusCode::NOT_FOUND {
            debug!(url, "optional resource not found");
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: res.status().as_u16(),
            });
        }
        Ok(Some(res.into_body()))
    }

    /// Whether requests to `url` must go through the rate limiter.
    pub fn is_rate_limited(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.rate_limited_hosts.iter().any(|limited| {
            host == limited
                || host
                    .strip_suffix(limited.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    async fn get(&self, url: &str) -> Result<http::Response<Vec<u8>>, FetchError> {
        let cancelled = || FetchError::Cancelled {
            url: url.to_string(),
        };

        if self.is_rate_limited(url) {
            self.limiter
                .wait(&self.cancel)
                .await
                .map_err(|_| cancelled())?;
        }
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled()),
            res = self.client.get(url) => res.map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

// ============================================================================
// reqwest client
// ============================================================================

#[async_trait]
impl HttpClient for reqwest::Client {
    async fn get(&self, url: &str) -> Result<http::Response<Vec<u8>>, HttpClientError> {
        let res = reqwest::Client::get(self, url)
            .send()
            .await
            .map_err(|e| HttpClientError::Transport(e.to_string()))?;
        let status = res.status().as_u16();
        let body = res
            .bytes()
            .await
            .map_err(|e| HttpClientError::ReadingResponse(e.to_string()))?
            .to_vec();
        http::Response::builder()
            .status(status)
            .body(body)
            .map_err(|e| HttpClientError::ReadingResponse(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
