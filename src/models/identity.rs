use chrono::{DateTime, Utc};
use serde::Serialize;

/// An outbound network identity (proxy endpoint) and its health.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Identity {
    pub endpoint: String,
    pub fail_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            fail_count: 0,
            last_used_at: None,
        }
    }
}
