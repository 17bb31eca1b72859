//! JSON-over-HTTP client shared by the indexer and node clients.
//!
//! Wraps `reqwest::Client` with a per-request timeout and retry with
//! exponential backoff and jitter on transient failures.

use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Delays between attempts, in milliseconds.
const RETRY_DELAYS_MS: [u64; 2] = [500, 1500];

/// Jitter percentage for backoff (±10%).
const JITTER_PERCENT: f64 = 0.1;

/// HTTP client bound to one base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    retry_delays: Vec<Duration>,
    #[cfg(test)]
    pub(crate) fetch_count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl HttpClient {
    /// Create a client for `base_url` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the URL is not absolute or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SyncError::Config(format!("Invalid endpoint URL: {base_url}")));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            retry_delays: RETRY_DELAYS_MS.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            #[cfg(test)]
            fetch_count: Default::default(),
        })
    }

    /// Replace the delays between attempts; an empty list disables retries.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with query parameters and decode the JSON body.
    ///
    /// Transient errors are retried with backoff; the last error is returned
    /// once attempts are exhausted.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let attempts = self.retry_delays.len() + 1;

        let mut last_error = None;
        for attempt in 0..attempts {
            #[cfg(test)]
            {
                self.fetch_count
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }

            match self.get_once(&url, query).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !error.is_transient() {
                        return Err(error);
                    }
                    debug!("GET {} failed (attempt {}/{}): {}", url, attempt + 1, attempts, error);
                    last_error = Some(error);

                    if let Some(base_delay) = self.retry_delays.get(attempt) {
                        let jitter = rand::random::<f64>() * JITTER_PERCENT * 2.0 - JITTER_PERCENT;
                        sleep(base_delay.mul_f64(1.0 + jitter)).await;
                    }
                }
            }
        }

        Err(match last_error {
            Some(SyncError::Timeout { .. }) | None => SyncError::Timeout {
                url,
                attempts: attempts as u32,
            },
            Some(other) => other,
        })
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                SyncError::Malformed(format!("{url}: {e}"))
            } else {
                classify(url, e)
            }
        })
    }
}

/// Map a reqwest error onto our error type.
fn classify(url: &str, error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Timeout {
            url: url.to_string(),
            attempts: 1,
        }
    } else {
        SyncError::Transport {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}
