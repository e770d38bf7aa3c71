//! Reqwest-backed insurer client.

use super::retry::RetryConfig;
use super::types::{
    BindRequest, BoundPolicy, ClaimChecklist, PriceFirmRequest, PricedQuote, Product,
    RawQuoteResponse,
};
use super::InsurerApi;
use crate::{BoxFut, Error, Result};
use serde::de::DeserializeOwned;
use std::time::Instant;
use tracing::{debug, warn};

/// HTTPS client for the insurer API. Bearer auth, camelCase JSON.
pub struct InsurerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl InsurerClient {
    /// Create a client with the default retry budget (3 attempts, 10 s per
    /// attempt, 30 s overall).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_retry(base_url, api_key, RetryConfig::default())
    }

    /// Create a client with a custom retry configuration.
    pub fn with_retry(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tripcover/0.1")
            .timeout(retry.attempt_deadline)
            .build()
            .map_err(|e| Error::DownstreamUnavailable {
                service: "insurer",
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry,
        })
    }

    /// One POST attempt. Classifies transport errors and 5xx as
    /// retryable, everything else as a rejection.
    async fn post_once<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let start = Instant::now();
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::DownstreamUnavailable {
                service: "insurer",
                detail: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::DownstreamUnavailable {
                service: "insurer",
                detail: format!("failed to read response: {e}"),
            })?;
        debug!(
            "insurer {path}: HTTP {status} in {:.2}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if status.is_server_error() {
            return Err(Error::DownstreamUnavailable {
                service: "insurer",
                detail: format!("HTTP {status}: {text}"),
            });
        }
        if !status.is_success() {
            return Err(Error::DownstreamRejected {
                service: "insurer",
                detail: format!("HTTP {status}: {text}"),
            });
        }

        serde_json::from_str(&text).map_err(|e| Error::Parse(format!("insurer {path}: {e}")))
    }

    /// Retry loop for idempotent operations, bounded by the overall
    /// deadline.
    async fn post_idempotent<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let overall = tokio::time::timeout(self.retry.overall_deadline, async {
            let mut last_err = None;
            for attempt in 0..self.retry.max_attempts {
                if attempt > 0 {
                    let delay = self.retry.delay_for_attempt(attempt - 1);
                    warn!(
                        "insurer {path}: retrying after {:.1}s (attempt {}/{})",
                        delay.as_secs_f64(),
                        attempt + 1,
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                match self.post_once(path, body).await {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_retryable() => last_err = Some(err),
                    Err(err) => return Err(err),
                }
            }
            Err(last_err.unwrap_or(Error::DownstreamUnavailable {
                service: "insurer",
                detail: "retry budget exhausted".into(),
            }))
        })
        .await;

        match overall {
            Ok(result) => result,
            Err(_) => Err(Error::InternalTimeout {
                seconds: self.retry.overall_deadline.as_secs(),
            }),
        }
    }
}

impl InsurerApi for InsurerClient {
    fn list_products<'a>(&'a self, market: &'a str) -> BoxFut<'a, Result<Vec<Product>>> {
        Box::pin(async move {
            let body = serde_json::json!({ "market": market });
            self.post_idempotent("/products/list", &body).await
        })
    }

    fn price_firm<'a>(&'a self, request: &'a PriceFirmRequest) -> BoxFut<'a, Result<PricedQuote>> {
        Box::pin(async move {
            let body = serde_json::to_value(request)
                .map_err(|e| Error::Parse(format!("price_firm request: {e}")))?;
            let raw_value: serde_json::Value = self.post_idempotent("/quotes/price", &body).await?;
            let raw: RawQuoteResponse = serde_json::from_value(raw_value.clone())
                .map_err(|e| Error::Parse(format!("price_firm response: {e}")))?;
            Ok(PricedQuote::from_raw(raw, raw_value))
        })
    }

    fn bind<'a>(&'a self, request: &'a BindRequest) -> BoxFut<'a, Result<BoundPolicy>> {
        Box::pin(async move {
            // Non-idempotent from the adapter's perspective: one attempt,
            // the purchase coordinator owns retry with the same payload.
            let body = serde_json::to_value(request)
                .map_err(|e| Error::Parse(format!("bind request: {e}")))?;
            self.post_once("/policies/bind", &body).await
        })
    }

    fn claim_requirements<'a>(
        &'a self,
        claim_type: &'a str,
    ) -> BoxFut<'a, Result<ClaimChecklist>> {
        Box::pin(async move {
            let body = serde_json::json!({ "claimType": claim_type });
            self.post_idempotent("/claims/requirements", &body).await
        })
    }
}
