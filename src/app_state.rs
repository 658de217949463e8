use std::sync::Arc;
use tokio::sync::watch;

use crate::config::AppConfig;
use crate::db::{JsonDocumentStore, PgProductStore, ProductStore, StoreError};
use crate::models::run::RunMode;
use crate::orchestrator::Pipeline;
use crate::services::{
    backoff::{BackoffPolicy, RateLimiter},
    cookies::CookieJar,
    dead_letter::DeadLetterQueue,
    discovery::{DiscoveryError, SitemapClient, WorkDiscovery},
    fetcher::{FetchError, Fetcher},
    identity::{HttpProxyProvider, IdentityError, IdentityPool},
    plus_api::PlusApiClient,
    progress::ProgressTracker,
};

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Storage setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("Sitemap client setup failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Product client setup failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Proxy provider setup failed: {0}")]
    Identity(#[from] IdentityError),
}

/// Long-lived components shared by every run of the process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ProductStore>,
    pub tracker: ProgressTracker,
}

impl AppState {
    /// Open the configured product store: PostgreSQL when `DATABASE_URL` is
    /// set, the JSON document store otherwise.
    pub async fn new(config: AppConfig) -> Result<Self, SetupError> {
        let store: Arc<dyn ProductStore> = match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL");
                Arc::new(PgProductStore::connect(url).await?)
            }
            None => {
                let path = config.document_store_path();
                tracing::info!(path = %path.display(), "Using JSON document store");
                Arc::new(JsonDocumentStore::open(path).await?)
            }
        };

        let tracker = ProgressTracker::new(&config.data_dir);

        Ok(Self {
            config: Arc::new(config),
            store,
            tracker,
        })
    }

    fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.config.max_retries,
            self.config.initial_backoff(),
            self.config.backoff_factor,
        )
    }

    /// Wire a pipeline for `mode`. The product client, and with it the CSRF
    /// token, is only required when the mode fetches products.
    pub async fn pipeline(
        &self,
        mode: &RunMode,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Pipeline, SetupError> {
        let config = &self.config;

        let sitemap = SitemapClient::new(&config.sitemap_url, config.request_timeout())?;
        let discovery = WorkDiscovery::new(
            Arc::new(sitemap),
            config.url_cache_path(),
            &config.site_url,
            self.backoff(),
            self.tracker.clone(),
        );

        let fetcher = if mode.fetches_products() {
            Some(self.fetcher().await?)
        } else {
            None
        };

        let dead_letters = DeadLetterQueue::load(config.dead_letter_path()).await;

        Ok(Pipeline::new(
            self.store.clone(),
            discovery,
            fetcher,
            self.tracker.clone(),
            dead_letters,
            shutdown,
        ))
    }

    async fn fetcher(&self) -> Result<Fetcher, SetupError> {
        let config = &self.config;

        let cookies = CookieJar::load(config.plus_cookies.as_deref(), config.cookie_path()).await;
        tracing::info!(count = cookies.len(), "Loaded cookies for API requests");

        let client = PlusApiClient::new(
            &config.product_api_url,
            &config.site_url,
            config.plus_csrf_token.clone(),
            config.request_timeout(),
            cookies,
        )?;

        let identities = if config.use_proxy {
            let provider = HttpProxyProvider::new(
                config.proxy_endpoints(),
                config.proxy_source_url.clone(),
                &config.site_url,
                config.request_timeout(),
            )?;
            IdentityPool::new(Arc::new(provider), config.proxy_refresh_interval())
        } else {
            IdentityPool::disabled()
        };

        Ok(Fetcher::new(
            Arc::new(client),
            identities,
            RateLimiter::new(config.request_delay()),
            self.backoff(),
        ))
    }
}
