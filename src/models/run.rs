use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    Discovering,
    LoadingCheckpoint,
    Processing,
    Finalizing,
    Done,
}

/// What a run does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunMode {
    /// Discover the work list, then scrape it.
    Full,
    /// Refresh the work list only.
    DiscoverOnly,
    /// Scrape the cached work list.
    ScrapeOnly,
    /// Fetch and store exactly one identifier.
    Single(String),
    /// Re-attempt everything in the dead-letter file.
    RetryDeadLetters,
}

impl RunMode {
    /// Ordinary runs resume from and write the scrape checkpoint.
    pub fn uses_checkpoint(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::ScrapeOnly)
    }

    pub fn fetches_products(&self) -> bool {
        !matches!(self, RunMode::DiscoverOnly)
    }
}

/// Parameters of one run, validated before anything else happens.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RunParams {
    #[garde(skip)]
    pub mode: RunMode,

    #[garde(skip)]
    pub skip: usize,

    #[garde(range(min = 1))]
    pub limit: Option<usize>,

    #[garde(range(min = 1, max = 10_000))]
    pub batch_size: usize,

    #[garde(skip)]
    pub force_refresh: bool,

    #[garde(range(min = 1))]
    pub checkpoint_every: usize,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            mode: RunMode::Full,
            skip: 0,
            limit: None,
            batch_size: 10,
            force_refresh: false,
            checkpoint_every: 10,
        }
    }
}

impl RunParams {
    /// Apply `skip` then `limit` to an ordered list.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let start = self.skip.min(items.len());
        let end = match self.limit {
            Some(limit) => start.saturating_add(limit).min(items.len()),
            None => items.len(),
        };
        items[start..end].to_vec()
    }
}

/// Statistics of one run, persisted to the run-stats table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStats {
    pub run_id: Uuid,
    pub mode: String,
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub final_position: usize,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
}

impl RunStats {
    pub fn start(mode: &RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode: mode.to_string(),
            total: 0,
            processed: 0,
            failed: 0,
            skipped: 0,
            final_position: 0,
            interrupted: false,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_secs: 0.0,
        }
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.elapsed_secs = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.finished_at = Some(now);
    }
}
