use serde::{Deserialize, Serialize};

/// How much the discovery source vouches for an identifier.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Listed by the remote index (or a cached copy of it).
    #[default]
    Listed,
    /// Guessed by the fallback generator; may not exist upstream.
    Synthetic,
}

/// One crawlable product: a stable identifier plus the address to fetch it from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    pub identifier: String,
    pub locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub confidence: Confidence,
}

impl WorkItem {
    pub fn new(identifier: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            locator: locator.into(),
            last_modified: None,
            confidence: Confidence::Listed,
        }
    }

    /// Build an item from a locator alone, deriving the identifier from it.
    pub fn from_locator(locator: &str, last_modified: Option<String>) -> Self {
        Self {
            identifier: extract_identifier(locator).unwrap_or_default(),
            locator: locator.to_string(),
            last_modified,
            confidence: Confidence::Listed,
        }
    }

    /// Item for an identifier that no index listed, addressed by the canonical product path.
    pub fn synthetic(identifier: impl Into<String>, site_url: &str) -> Self {
        let identifier = identifier.into();
        let locator = product_locator(site_url, &identifier);
        Self {
            identifier,
            locator,
            last_modified: None,
            confidence: Confidence::Synthetic,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.confidence == Confidence::Synthetic
    }

    /// Serialize as one `locator|identifier|last_modified` cache line.
    pub fn to_cache_line(&self) -> String {
        format!(
            "{}|{}|{}",
            self.locator,
            self.identifier,
            self.last_modified.as_deref().unwrap_or("")
        )
    }

    /// Parse one cache line. Missing identifiers are derived from the locator.
    pub fn from_cache_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let mut parts = line.splitn(3, '|');
        let locator = parts.next()?.trim();
        if locator.is_empty() {
            return None;
        }

        let identifier = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| extract_identifier(locator))
            .unwrap_or_default();

        let last_modified = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Some(Self {
            identifier,
            locator: locator.to_string(),
            last_modified,
            confidence: Confidence::Listed,
        })
    }
}

/// Canonical product page for an identifier.
pub fn product_locator(site_url: &str, identifier: &str) -> String {
    format!("{}/product/product-{}", site_url.trim_end_matches('/'), identifier)
}

/// Extract the identifier from a product URL: its last `-`-separated segment.
///
/// `https://www.plus.nl/product/plus-boerentrots-bbq-worst-280-g-553975` yields `553975`.
pub fn extract_identifier(locator: &str) -> Option<String> {
    locator
        .trim()
        .trim_end_matches('/')
        .rsplit('-')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.contains('/'))
        .map(str::to_string)
}
