//! Fetch with backoff: rate limiting, identity rotation and retry around a
//! [`ProductSource`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Instant};

use crate::models::identity::Identity;
use crate::models::work_item::WorkItem;
use crate::services::backoff::{BackoffPolicy, RateLimiter};
use crate::services::identity::IdentityPool;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Product API returned HTTP {0}")]
    Status(u16),

    #[error("Product API returned invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid response format for {0}: no data field")]
    MissingData(String),

    #[error("PLUS_CSRF_TOKEN is required to fetch products")]
    MissingCsrfToken,
}

impl FetchError {
    /// Whether another attempt for `item` could succeed.
    pub fn is_retryable(&self, item: &WorkItem) -> bool {
        match self {
            FetchError::Status(404 | 410) => false,
            FetchError::MissingData(_) => !item.is_synthetic(),
            FetchError::MissingCsrfToken => false,
            _ => true,
        }
    }

    /// Whether the failure says something about the identity used.
    fn blames_identity(&self) -> bool {
        !matches!(self, FetchError::Status(404 | 410) | FetchError::MissingCsrfToken)
    }
}

/// One network fetch of one product, no retries.
#[async_trait]
pub trait ProductSource: Send + Sync {
    /// Raw payload for `item`. A payload without a top-level `data` field is
    /// reported as [`FetchError::MissingData`].
    async fn fetch(&self, item: &WorkItem, identity: Option<&Identity>) -> Result<Value, FetchError>;
}

/// Final result of fetching one item.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(Value),
    /// Retryable failures until `max_retries` ran out; carries the last error.
    Exhausted(FetchError),
    /// Failed in a way no retry can fix.
    Permanent(FetchError),
}

/// Sequential fetcher owning the process-wide rate limiter and identity pool.
pub struct Fetcher {
    source: Arc<dyn ProductSource>,
    identities: IdentityPool,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn ProductSource>,
        identities: IdentityPool,
        limiter: RateLimiter,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            source,
            identities,
            limiter,
            backoff,
        }
    }

    pub fn identities(&self) -> &IdentityPool {
        &self.identities
    }

    pub async fn fetch(&mut self, item: &WorkItem) -> FetchOutcome {
        let mut attempt: u32 = 0;

        loop {
            self.limiter.wait().await;
            let identity = self.identities.acquire().await;

            tracing::debug!(
                sku = %item.identifier,
                attempt = attempt + 1,
                identity = identity.as_ref().map(|i| i.endpoint.as_str()).unwrap_or("direct"),
                "Fetching product"
            );
            metrics::counter!("scrape_fetch_attempts_total").increment(1);
            let started = Instant::now();
            let result = self.source.fetch(item, identity.as_ref()).await;
            metrics::histogram!("scrape_fetch_seconds").record(started.elapsed().as_secs_f64());

            let error = match result {
                Ok(payload) => {
                    if let Some(identity) = &identity {
                        self.identities.report_success(&identity.endpoint);
                    }
                    return FetchOutcome::Fetched(payload);
                }
                Err(e) => e,
            };

            if let Some(identity) = &identity {
                if error.blames_identity() {
                    self.identities.report_failure(&identity.endpoint);
                } else {
                    self.identities.report_success(&identity.endpoint);
                }
            }

            if !error.is_retryable(item) {
                tracing::warn!(sku = %item.identifier, error = %error, "Permanent fetch failure");
                return FetchOutcome::Permanent(error);
            }

            if attempt >= self.backoff.max_retries {
                tracing::error!(
                    sku = %item.identifier,
                    max_retries = self.backoff.max_retries,
                    error = %error,
                    "Max retries exceeded"
                );
                return FetchOutcome::Exhausted(error);
            }

            let delay = self.backoff.delay(attempt);
            tracing::warn!(
                sku = %item.identifier,
                retry = attempt + 1,
                max_retries = self.backoff.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Fetch failed, retrying"
            );
            metrics::counter!("scrape_fetch_retries_total").increment(1);
            sleep(delay).await;
            attempt += 1;
        }
    }
}
