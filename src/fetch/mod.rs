// src/fetch/mod.rs
//! Resilient fetcher: bounded attempts, per-attempt timeout, exponential backoff.
//!
//! The network itself sits behind [`Transport`] so the retry policy can be
//! exercised without sockets (see `tests/common`).

pub mod http;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_timeout_ms() -> u64 {
    10_000
}

/// Retry policy applied to one logical request.
///
/// `timeout_ms == 0` disables the per-attempt deadline. `max_attempts == 0`
/// is treated as a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn once(timeout_ms: u64) -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            timeout_ms,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before the retry that follows failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let factor = 1u64 << exp;
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Opaque passthrough of request options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: String,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: vec![("accept".to_string(), "application/json".to_string())],
        }
    }
}

/// Fully read response of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. Garbage is `InvalidContent`, never a transport error.
    pub fn json(&self) -> Result<serde_json::Value, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::InvalidContent(e.to_string()))
    }
}

/// One network round-trip. Implementations must not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, url: &str, options: &RequestOptions)
        -> Result<FetchResponse, FetchError>;
}

#[derive(Clone)]
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
}

impl ResilientFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Attempt the request up to `policy.max_attempts` times.
    ///
    /// Non-2xx responses are failures and are retried like transport errors.
    /// The error of the last attempt is returned once all attempts are spent.
    pub async fn fetch(
        &self,
        url: &str,
        options: &RequestOptions,
        policy: &RetryPolicy,
    ) -> Result<FetchResponse, FetchError> {
        crate::metrics::ensure_metrics_described();
        let max_attempts = policy.attempts();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("fetch_attempts_total").increment(1);

            let err = match self.attempt_once(url, options, policy).await {
                Ok(rsp) => return Ok(rsp),
                Err(e) => e,
            };
            counter!("fetch_failures_total", "kind" => err.kind().as_str()).increment(1);

            if attempt >= max_attempts {
                tracing::warn!(
                    target: "fetch",
                    %url, attempt, max_attempts, error = %err,
                    "giving up"
                );
                return Err(err);
            }

            let delay = policy.backoff_delay(attempt);
            tracing::warn!(
                target: "fetch",
                %url, attempt, max_attempts, error = %err,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// `fetch` followed by JSON parsing of the final response.
    pub async fn fetch_json(
        &self,
        url: &str,
        options: &RequestOptions,
        policy: &RetryPolicy,
    ) -> Result<serde_json::Value, FetchError> {
        self.fetch(url, options, policy).await?.json()
    }

    async fn attempt_once(
        &self,
        url: &str,
        options: &RequestOptions,
        policy: &RetryPolicy,
    ) -> Result<FetchResponse, FetchError> {
        let call = self.transport.execute(url, options);
        let rsp = if policy.timeout_ms == 0 {
            call.await?
        } else {
            tokio::time::timeout(Duration::from_millis(policy.timeout_ms), call)
                .await
                .map_err(|_| FetchError::Timeout {
                    after_ms: policy.timeout_ms,
                })??
        };

        if !rsp.is_success() {
            return Err(FetchError::HttpStatus { status: rsp.status });
        }
        Ok(rsp)
    }
}
