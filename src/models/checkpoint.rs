use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which pipeline a checkpoint belongs to. Each kind has its own file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CheckpointKind {
    Scrape,
    Sitemap,
}

/// Durable progress marker: how far into the ordered work list a run got.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub cursor_position: usize,
    pub total: usize,
    pub progress_pct: f64,
    pub timestamp: DateTime<Utc>,
    /// `--skip` of the run that wrote this checkpoint.
    #[serde(default)]
    pub skip: usize,
    /// `--limit` of the run that wrote this checkpoint.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Checkpoint {
    pub fn new(cursor_position: usize, total: usize) -> Self {
        let progress_pct = if total > 0 {
            cursor_position as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            cursor_position,
            total,
            progress_pct,
            timestamp: Utc::now(),
            skip: 0,
            limit: None,
        }
    }

    /// Tag the checkpoint with the `skip`/`limit` window its position indexes into.
    pub fn with_window(mut self, skip: usize, limit: Option<usize>) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }

    /// Position to resume a list of `len` items sliced with `skip`/`limit` from,
    /// if this checkpoint applies to it.
    ///
    /// A checkpoint taken against another window or a list of another length,
    /// or one that already reached the end, does not apply.
    pub fn resume_position(&self, len: usize, skip: usize, limit: Option<usize>) -> Option<usize> {
        let same_window = self.skip == skip && self.limit == limit;
        (same_window && self.total == len && self.cursor_position < len).then_some(self.cursor_position)
    }
}
