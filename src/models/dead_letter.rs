use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::work_item::WorkItem;

/// A work item that failed permanently, kept for a later retry pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterEntry {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    pub work_item: WorkItem,
}

fn default_attempts() -> u32 {
    1
}

impl DeadLetterEntry {
    pub fn new(work_item: WorkItem, reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            reason: reason.into(),
            attempts: 1,
            work_item,
        }
    }
}
