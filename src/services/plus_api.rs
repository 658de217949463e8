//! PLUS product-details API client.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::models::identity::Identity;
use crate::models::work_item::WorkItem;
use crate::services::cookies::CookieJar;
use crate::services::fetcher::{FetchError, ProductSource};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36";

const MODULE_VERSION: &str = "6uc+XDsRynmQ7JQS4jOSaQ";
const API_VERSION: &str = "j2jjJJxS4heD58kEZAYPUQ";

/// Client for the product-details endpoint.
///
/// Keeps one HTTP client per proxy endpoint and the shared cookie jar, which
/// is updated from `Set-Cookie` headers of successful responses.
pub struct PlusApiClient {
    api_url: String,
    site_url: String,
    csrf_token: String,
    timeout: Duration,
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
    cookies: tokio::sync::Mutex<CookieJar>,
}

impl PlusApiClient {
    pub fn new(
        api_url: impl Into<String>,
        site_url: impl Into<String>,
        csrf_token: Option<String>,
        timeout: Duration,
        cookies: CookieJar,
    ) -> Result<Self, FetchError> {
        let csrf_token = csrf_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(FetchError::MissingCsrfToken)?;

        Ok(Self {
            api_url: api_url.into(),
            site_url: site_url.into(),
            csrf_token,
            timeout,
            direct: build_client(None, timeout)?,
            proxied: Mutex::new(HashMap::new()),
            cookies: tokio::sync::Mutex::new(cookies),
        })
    }

    fn client_for(&self, identity: Option<&Identity>) -> Result<reqwest::Client, FetchError> {
        let Some(identity) = identity else {
            return Ok(self.direct.clone());
        };

        let mut clients = self.proxied.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(&identity.endpoint) {
            return Ok(client.clone());
        }
        let client = build_client(Some(&identity.endpoint), self.timeout)?;
        clients.insert(identity.endpoint.clone(), client.clone());
        Ok(client)
    }

    fn referrer(&self, item: &WorkItem) -> String {
        if item.locator.starts_with("http") {
            item.locator.clone()
        } else {
            self.site_url.clone()
        }
    }
}

fn build_client(proxy: Option<&str>, timeout: Duration) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(timeout);
    if let Some(endpoint) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(endpoint)?);
    }
    Ok(builder.build()?)
}

/// Slug the product page uses: the last path segment of the locator.
fn product_slug(item: &WorkItem) -> String {
    item.locator
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_string)
        .unwrap_or_else(|| format!("product-{}", item.identifier))
}

/// Request body for one product, keyed by its SKU.
pub fn request_body(item: &WorkItem) -> Value {
    json!({
        "versionInfo": {
            "moduleVersion": MODULE_VERSION,
            "apiVersion": API_VERSION
        },
        "viewName": "MainFlow.ProductDetailsPage",
        "screenData": {
            "variables": {
                "Locale": "nl-NL",
                "StoreId": "0",
                "StoreNumber": 0,
                "SKU": item.identifier,
                "_sKUInDataFetchStatus": 1,
                "ProductName": product_slug(item),
                "_productNameInDataFetchStatus": 1
            }
        }
    })
}

#[async_trait]
impl ProductSource for PlusApiClient {
    async fn fetch(&self, item: &WorkItem, identity: Option<&Identity>) -> Result<Value, FetchError> {
        let client = self.client_for(identity)?;
        let cookie_header = self.cookies.lock().await.header_value();

        tracing::debug!(sku = %item.identifier, "Fetching product");

        let response = client
            .post(&self.api_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::ACCEPT_LANGUAGE, "nl-NL,nl;q=0.9,en-US;q=0.8,en;q=0.7")
            .header(reqwest::header::ORIGIN, &self.site_url)
            .header(reqwest::header::REFERER, self.referrer(item))
            .header(reqwest::header::COOKIE, cookie_header)
            .header("outsystems-locale", "nl-NL")
            .header("x-csrftoken", &self.csrf_token)
            .json(&request_body(item))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let set_cookies: Vec<String> = response
                .headers()
                .get_all(reqwest::header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_string)
                .collect();

            if !set_cookies.is_empty() {
                let mut jar = self.cookies.lock().await;
                let changed = jar.merge_set_cookie(set_cookies.iter().map(String::as_str));
                if changed > 0 {
                    tracing::debug!(changed, "Updated cookies from response");
                    if let Err(e) = jar.save().await {
                        tracing::warn!(error = %e, "Failed to persist cookies");
                    }
                }
            }
        } else {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let payload: Value = serde_json::from_str(&body)?;

        match payload.get("data") {
            Some(Value::Null) | None => Err(FetchError::MissingData(item.identifier.clone())),
            Some(_) => Ok(payload),
        }
    }
}
