//! Outbound identity rotation.
//!
//! A round-robin pool of proxy endpoints. Endpoints that fail
//! [`EVICTION_THRESHOLD`] times in a row are dropped; the pool is rebuilt
//! from a [`ProxyProvider`] when it runs empty or goes stale. A refresh that
//! admits nothing keeps the current pool, and an empty pool whose last refresh
//! came back empty waits out the refresh interval before asking again.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::identity::Identity;

/// Consecutive failures after which an identity leaves the pool.
pub const EVICTION_THRESHOLD: u32 = 3;

/// Upper bound on candidates probed per refresh.
pub const MAX_CANDIDATES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Proxy source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Proxy source returned status {0}")]
    Status(u16),
}

/// Supplies proxy endpoints that have already proven they can reach the target.
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    async fn candidates(&self) -> Result<Vec<String>, IdentityError>;
}

/// Provider backed by a static list (or single gateway) and an optional
/// plain-text list fetched over HTTP. Every candidate is probed before use.
pub struct HttpProxyProvider {
    http: reqwest::Client,
    static_list: Vec<String>,
    source_url: Option<String>,
    probe_url: String,
    probe_timeout: Duration,
}

impl HttpProxyProvider {
    pub fn new(
        static_list: Vec<String>,
        source_url: Option<String>,
        probe_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            http,
            static_list,
            source_url,
            probe_url: probe_url.into(),
            probe_timeout: Duration::from_secs(3),
        })
    }

    async fn fetch_source(&self, url: &str) -> Result<Vec<String>, IdentityError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(IdentityError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        Ok(parse_proxy_list(&body))
    }

    /// GET the probe URL through `endpoint`; admitted only on a 200.
    async fn probe(&self, endpoint: &str) -> bool {
        let proxy = match reqwest::Proxy::all(endpoint) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "Invalid proxy endpoint");
                return false;
            }
        };

        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.probe_timeout)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "Failed to build probe client");
                return false;
            }
        };

        match client.get(&self.probe_url).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "Proxy probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl ProxyProvider for HttpProxyProvider {
    async fn candidates(&self) -> Result<Vec<String>, IdentityError> {
        let mut endpoints = self.static_list.clone();
        if let Some(url) = &self.source_url {
            endpoints.extend(self.fetch_source(url).await?);
        }

        let mut seen = std::collections::HashSet::new();
        endpoints.retain(|e| seen.insert(e.clone()));
        endpoints.truncate(MAX_CANDIDATES);

        let mut admitted = Vec::new();
        for endpoint in endpoints {
            if self.probe(&endpoint).await {
                admitted.push(endpoint);
            }
        }
        Ok(admitted)
    }
}

/// One endpoint per line (`#` comments allowed); bare `host:port` gets an `http://` scheme.
pub fn parse_proxy_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            if l.contains("://") {
                l.to_string()
            } else {
                format!("http://{l}")
            }
        })
        .collect()
}

/// Round-robin identity pool, owned by the fetch loop.
pub struct IdentityPool {
    enabled: bool,
    provider: Option<Arc<dyn ProxyProvider>>,
    identities: Vec<Identity>,
    cursor: usize,
    refresh_interval: Duration,
    last_refresh: Option<Instant>,
    /// The pool was empty after the last refresh.
    exhausted: bool,
}

impl IdentityPool {
    pub fn new(provider: Arc<dyn ProxyProvider>, refresh_interval: Duration) -> Self {
        Self {
            enabled: true,
            provider: Some(provider),
            identities: Vec::new(),
            cursor: 0,
            refresh_interval,
            last_refresh: None,
            exhausted: false,
        }
    }

    /// A pool that never hands out an identity.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            provider: None,
            identities: Vec::new(),
            cursor: 0,
            refresh_interval: Duration::from_secs(300),
            last_refresh: None,
            exhausted: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    fn needs_refresh(&self) -> bool {
        match self.last_refresh {
            None => true,
            Some(at) if at.elapsed() >= self.refresh_interval => true,
            Some(_) => self.identities.is_empty() && !self.exhausted,
        }
    }

    /// Next identity in round-robin order, or `None` when rotation is off or
    /// no identity is available.
    pub async fn acquire(&mut self) -> Option<Identity> {
        if !self.enabled {
            return None;
        }
        if self.needs_refresh() {
            self.refresh().await;
        }
        if self.identities.is_empty() {
            return None;
        }

        if self.cursor >= self.identities.len() {
            self.cursor = 0;
        }
        let identity = &mut self.identities[self.cursor];
        identity.last_used_at = Some(Utc::now());
        let acquired = identity.clone();
        self.cursor = (self.cursor + 1) % self.identities.len();

        Some(acquired)
    }

    pub fn report_success(&mut self, endpoint: &str) {
        if let Some(identity) = self.identities.iter_mut().find(|i| i.endpoint == endpoint) {
            identity.fail_count = 0;
        }
    }

    pub fn report_failure(&mut self, endpoint: &str) {
        let Some(idx) = self.identities.iter().position(|i| i.endpoint == endpoint) else {
            return;
        };

        self.identities[idx].fail_count += 1;
        if self.identities[idx].fail_count < EVICTION_THRESHOLD {
            return;
        }

        let evicted = self.identities.remove(idx);
        // Keep the cursor on the entry it pointed at before the removal.
        if idx < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.identities.len() {
            self.cursor = 0;
        }

        metrics::counter!("identity_evictions_total").increment(1);
        metrics::gauge!("identity_pool_size").set(self.identities.len() as f64);
        tracing::warn!(
            endpoint = %evicted.endpoint,
            remaining = self.identities.len(),
            "Evicted failing identity"
        );
    }

    /// Replace the pool with fresh candidates. A failed or empty refresh
    /// leaves the pool as it was.
    pub async fn refresh(&mut self) {
        self.last_refresh = Some(Instant::now());
        let Some(provider) = &self.provider else {
            return;
        };

        match provider.candidates().await {
            Ok(endpoints) if endpoints.is_empty() => {
                tracing::warn!(
                    kept = self.identities.len(),
                    "Identity pool refresh admitted no endpoints, keeping current pool"
                );
            }
            Ok(endpoints) => {
                self.identities = endpoints.into_iter().map(Identity::new).collect();
                self.cursor = 0;
                metrics::gauge!("identity_pool_size").set(self.identities.len() as f64);
                tracing::info!(available = self.identities.len(), "Refreshed identity pool");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Identity pool refresh failed, continuing without new identities");
            }
        }
        self.exhausted = self.identities.is_empty();
    }
}
