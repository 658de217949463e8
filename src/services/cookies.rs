use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Cookies sent when nothing else is configured.
const DEFAULT_COOKIES: [(&str, &str); 2] = [("SSLB", "1"), ("plus_cookie_level", "3")];

/// Persistent cookie set for the product API.
#[derive(Debug, Clone)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
    path: PathBuf,
}

impl CookieJar {
    /// Load cookies from the configured `a=1; b=2` string, else from the file
    /// at `path`, else fall back to the default set.
    pub async fn load(configured: Option<&str>, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let mut cookies = configured.map(parse_cookie_string).unwrap_or_default();
        if !cookies.is_empty() {
            tracing::debug!(count = cookies.len(), "Loaded cookies from configuration");
        } else {
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                    Ok(saved) => {
                        tracing::debug!(count = saved.len(), "Loaded cookies from cache file");
                        cookies = saved;
                    }
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cookie file is corrupted"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cannot read cookie file"),
            }
        }

        if cookies.is_empty() {
            tracing::warn!("No cookies configured, using minimal defaults; set PLUS_COOKIES for real sessions");
            cookies = DEFAULT_COOKIES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        }

        Self { cookies, path }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Value for a `Cookie` request header.
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Merge `Set-Cookie` header values. Returns how many cookies changed.
    pub fn merge_set_cookie<'a>(&mut self, headers: impl IntoIterator<Item = &'a str>) -> usize {
        let mut changed = 0;
        for header in headers {
            let pair = header.split(';').next().unwrap_or_default();
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().to_string();
            if self.cookies.get(name) != Some(&value) {
                self.cookies.insert(name.to_string(), value);
                changed += 1;
            }
        }
        changed
    }

    pub async fn save(&self) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&self.cookies)?;
        tokio::fs::write(&self.path, bytes).await?;
        tracing::debug!(count = self.cookies.len(), "Saved cookies");
        Ok(())
    }
}

/// Parse `name=value; other=value` into a map. Malformed pairs are ignored.
pub fn parse_cookie_string(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
