use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Directory for the work-list cache, checkpoints, dead letters, cookies
    /// and the JSON document store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// PostgreSQL connection string. Without it products go to `$DATA_DIR/db.json`.
    #[serde(default)]
    pub database_url: Option<String>,

    /// CSRF token for the product API. Only needed by modes that fetch products.
    #[serde(default)]
    pub plus_csrf_token: Option<String>,

    /// Initial cookies as `name=value; other=value`.
    #[serde(default)]
    pub plus_cookies: Option<String>,

    #[serde(default = "default_site_url")]
    pub site_url: String,

    #[serde(default = "default_sitemap_url")]
    pub sitemap_url: String,

    #[serde(default = "default_product_api_url")]
    pub product_api_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: f64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Minimum spacing between outbound requests.
    #[serde(default = "default_request_delay_secs")]
    pub request_delay_secs: f64,

    #[serde(default)]
    pub use_proxy: bool,

    /// Comma-separated proxy endpoints, or a single gateway URL.
    #[serde(default)]
    pub proxy_list: Option<String>,

    /// URL of a plain-text proxy list, one endpoint per line.
    #[serde(default)]
    pub proxy_source_url: Option<String>,

    #[serde(default = "default_proxy_refresh_secs")]
    pub proxy_refresh_secs: u64,

    /// Prometheus listener address (e.g., "0.0.0.0:9000"). Metrics are off when unset.
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,

    #[serde(default)]
    pub log_json: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_site_url() -> String {
    "https://www.plus.nl".to_string()
}

fn default_sitemap_url() -> String {
    "https://www.plus.nl/ECP_Sitemap_Engine/rest/Sitemap/product".to_string()
}

fn default_product_api_url() -> String {
    "https://www.plus.nl/screenservices/ECP_Product_CW/ProductDetails/PDPContent/DataActionGetProductDetailsAndAgeInfo".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_secs() -> f64 {
    1.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_request_delay_secs() -> f64 {
    0.25
}

fn default_proxy_refresh_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.initial_backoff_secs.max(0.0))
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_secs.max(0.0))
    }

    pub fn proxy_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.proxy_refresh_secs)
    }

    pub fn proxy_endpoints(&self) -> Vec<String> {
        self.proxy_list
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn url_cache_path(&self) -> PathBuf {
        self.data_dir.join("product_urls.txt")
    }

    pub fn dead_letter_path(&self) -> PathBuf {
        self.data_dir.join("retry.json")
    }

    pub fn cookie_path(&self) -> PathBuf {
        self.data_dir.join("cookies.json")
    }

    pub fn document_store_path(&self) -> PathBuf {
        self.data_dir.join("db.json")
    }
}
