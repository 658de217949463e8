//! Work discovery: the product sitemap, a local cache of it, and a
//! synthetic fallback list for when the sitemap is out of reach.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;

use crate::models::checkpoint::CheckpointKind;
use crate::models::work_item::{product_locator, WorkItem};
use crate::services::backoff::BackoffPolicy;
use crate::services::progress::{write_atomic, ProgressTracker};

/// Identifiers always included in the fallback list.
const KNOWN_IDENTIFIERS: [u32; 1] = [553975];
const FALLBACK_START: u32 = 100_000;
const FALLBACK_END: u32 = 600_000;
const FALLBACK_STEP: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Sitemap request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sitemap access denied (HTTP {0})")]
    Denied(u16),

    #[error("Sitemap returned status {0}")]
    Status(u16),
}

impl DiscoveryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DiscoveryError::Http(_) => true,
            DiscoveryError::Denied(_) => false,
            DiscoveryError::Status(code) => *code >= 500 || *code == 429,
        }
    }
}

/// Remote listing of every product page.
#[async_trait]
pub trait IndexSource: Send + Sync {
    /// Raw sitemap document.
    async fn fetch_index(&self) -> Result<String, DiscoveryError>;
}

/// HTTP client for the product sitemap.
pub struct SitemapClient {
    http: reqwest::Client,
    url: String,
}

impl SitemapClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DiscoveryError> {
        let http = reqwest::Client::builder()
            .user_agent(crate::services::plus_api::BROWSER_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IndexSource for SitemapClient {
    async fn fetch_index(&self) -> Result<String, DiscoveryError> {
        tracing::info!(url = %self.url, "Fetching sitemap");

        let response = self
            .http
            .get(&self.url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "nl-NL,nl;q=0.9,en-US;q=0.8,en;q=0.7")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(DiscoveryError::Denied(status.as_u16()));
        }
        if !status.is_success() {
            return Err(DiscoveryError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

/// Where a work list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DiscoveryOrigin {
    /// Freshly parsed from the remote sitemap.
    Index,
    /// Read from the local cache file.
    Cache,
    /// Generated because the sitemap denied access or could not be reached.
    Fallback,
    /// The sitemap answered with an error; nothing to do.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct Discovery {
    pub items: Vec<WorkItem>,
    pub origin: DiscoveryOrigin,
}

/// Produces the ordered work list.
pub struct WorkDiscovery {
    source: Arc<dyn IndexSource>,
    cache_path: PathBuf,
    site_url: String,
    backoff: BackoffPolicy,
    tracker: ProgressTracker,
}

impl WorkDiscovery {
    pub fn new(
        source: Arc<dyn IndexSource>,
        cache_path: impl Into<PathBuf>,
        site_url: impl Into<String>,
        backoff: BackoffPolicy,
        tracker: ProgressTracker,
    ) -> Self {
        Self {
            source,
            cache_path: cache_path.into(),
            site_url: site_url.into(),
            backoff,
            tracker,
        }
    }

    /// The full work list: the cache unless `force_refresh`, else the remote sitemap.
    pub async fn list_all(&self, force_refresh: bool) -> Discovery {
        if !force_refresh {
            if let Some(items) = self.load_cache().await {
                return self.finish(items, DiscoveryOrigin::Cache);
            }
        }

        let fetched = self
            .backoff
            .retry(|| self.source.fetch_index(), DiscoveryError::is_retryable)
            .await;

        match fetched {
            Ok(document) => {
                let items = parse_sitemap(&document);
                if items.is_empty() {
                    tracing::warn!("Sitemap contained no product entries");
                } else {
                    self.store_cache(&items).await;
                    if let Err(e) = self
                        .tracker
                        .save(CheckpointKind::Sitemap, items.len(), items.len())
                        .await
                    {
                        tracing::warn!(error = %e, "Failed to save sitemap checkpoint");
                    }
                }
                self.finish(items, DiscoveryOrigin::Index)
            }
            Err(e @ (DiscoveryError::Denied(_) | DiscoveryError::Http(_))) => {
                tracing::warn!(error = %e, "Sitemap unreachable, using generated fallback identifiers");
                self.finish(fallback_items(&self.site_url), DiscoveryOrigin::Fallback)
            }
            Err(e) => {
                tracing::error!(error = %e, "Sitemap fetch failed");
                self.finish(Vec::new(), DiscoveryOrigin::Unavailable)
            }
        }
    }

    /// [`list_all`](Self::list_all) without the items whose identifier is in `done`.
    pub async fn list_unprocessed(&self, done: &HashSet<String>, force_refresh: bool) -> Vec<WorkItem> {
        let all = self.list_all(force_refresh).await.items;
        let total = all.len();
        let unprocessed = filter_unprocessed(all, done);
        tracing::info!(
            unprocessed = unprocessed.len(),
            total,
            "Filtered work list against stored products"
        );
        unprocessed
    }

    /// The cached work item for `identifier`, if the cache lists it.
    pub async fn cached_item(&self, identifier: &str) -> Option<WorkItem> {
        self.load_cache()
            .await?
            .into_iter()
            .find(|item| item.identifier == identifier)
    }

    /// Work item for an explicitly requested identifier: the cached entry if
    /// there is one, else the canonical product page.
    pub async fn item_for(&self, identifier: &str) -> WorkItem {
        match self.cached_item(identifier).await {
            Some(item) => item,
            None => WorkItem::new(identifier, product_locator(&self.site_url, identifier)),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    fn finish(&self, items: Vec<WorkItem>, origin: DiscoveryOrigin) -> Discovery {
        metrics::counter!("discovery_runs_total", "origin" => origin.to_string()).increment(1);
        tracing::info!(origin = %origin, items = items.len(), "Discovered work items");
        Discovery { items, origin }
    }

    async fn load_cache(&self) -> Option<Vec<WorkItem>> {
        let raw = match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No cached work list found");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.cache_path.display(), error = %e, "Cannot read cached work list");
                return None;
            }
        };

        let items: Vec<WorkItem> = raw.lines().filter_map(WorkItem::from_cache_line).collect();
        if items.is_empty() {
            tracing::warn!(path = %self.cache_path.display(), "Cached work list is empty");
            return None;
        }

        tracing::info!(items = items.len(), "Loaded work list from cache");
        Some(items)
    }

    async fn store_cache(&self, items: &[WorkItem]) {
        let mut body = String::with_capacity(items.len() * 80);
        for item in items {
            body.push_str(&item.to_cache_line());
            body.push('\n');
        }

        let result: Result<(), std::io::Error> = async {
            if let Some(parent) = self.cache_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            write_atomic(&self.cache_path, body.as_bytes()).await
        }
        .await;

        match result {
            Ok(()) => tracing::debug!(items = items.len(), "Cached work list"),
            Err(e) => tracing::warn!(error = %e, "Failed to cache work list"),
        }
    }
}

/// Items whose identifier is non-empty and not in `done`, in their original order.
pub fn filter_unprocessed(items: Vec<WorkItem>, done: &HashSet<String>) -> Vec<WorkItem> {
    items
        .into_iter()
        .filter(|item| is_unprocessed(item, done))
        .collect()
}

pub fn is_unprocessed(item: &WorkItem, done: &HashSet<String>) -> bool {
    !item.identifier.is_empty() && !done.contains(&item.identifier)
}

/// Extract `<url><loc/><lastmod/></url>` entries. Input that is not a sitemap yields nothing.
pub fn parse_sitemap(document: &str) -> Vec<WorkItem> {
    let html = Html::parse_document(&inline_cdata(document));
    let url_sel = Selector::parse("url").expect("valid selector");
    let loc_sel = Selector::parse("loc").expect("valid selector");
    let lastmod_sel = Selector::parse("lastmod").expect("valid selector");

    html.select(&url_sel)
        .filter_map(|url| {
            let loc = url
                .select(&loc_sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())?;
            let lastmod = url
                .select(&lastmod_sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty());
            Some(WorkItem::from_locator(&loc, lastmod))
        })
        .collect()
}

/// The HTML parser treats `<![CDATA[...]]>` as a bogus comment, so CDATA
/// sections are rewritten as escaped text first.
fn inline_cdata(document: &str) -> Cow<'_, str> {
    const OPEN: &str = "<![CDATA[";
    const CLOSE: &str = "]]>";

    if !document.contains(OPEN) {
        return Cow::Borrowed(document);
    }

    let mut out = String::with_capacity(document.len());
    let mut rest = document;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let body = &rest[start + OPEN.len()..];
        let (text, tail) = match body.find(CLOSE) {
            Some(end) => (&body[..end], &body[end + CLOSE.len()..]),
            None => (body, ""),
        };
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                c => out.push(c),
            }
        }
        rest = tail;
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Deterministic best-guess identifiers, marked low-confidence.
pub fn fallback_items(site_url: &str) -> Vec<WorkItem> {
    (FALLBACK_START..=FALLBACK_END)
        .step_by(FALLBACK_STEP)
        .chain(KNOWN_IDENTIFIERS)
        .map(|id| WorkItem::synthetic(id.to_string(), site_url))
        .collect()
}
