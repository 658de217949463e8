//! The scrape pipeline state machine.
//!
//! `INIT -> DISCOVERING -> LOADING_CHECKPOINT -> PROCESSING -> FINALIZING -> DONE`.
//! Items are fetched one at a time in discovery order. Interrupts and storage
//! failures during processing still go through `FINALIZING`.

use garde::Validate;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::db::{ProductStore, StoreError};
use crate::models::checkpoint::{Checkpoint, CheckpointKind};
use crate::models::product::ProductRecord;
use crate::models::run::{PipelineState, RunMode, RunParams, RunStats};
use crate::models::work_item::WorkItem;
use crate::services::dead_letter::DeadLetterQueue;
use crate::services::discovery::{is_unprocessed, WorkDiscovery};
use crate::services::fetcher::{FetchOutcome, Fetcher};
use crate::services::normalize::normalize;
use crate::services::progress::{ProgressTracker, TrackerError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid run parameters: {0}")]
    InvalidParams(#[from] garde::Report),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Run mode {0} fetches products but no product client is configured")]
    FetcherUnavailable(RunMode),
}

/// Mutable bookkeeping of one PROCESSING pass.
struct Progress {
    stats: RunStats,
    cursor: usize,
    /// Position just after the last item whose record is in storage.
    safe_position: usize,
    pending: Vec<ProductRecord>,
    persisted: HashSet<String>,
    store_error: Option<StoreError>,
}

pub struct Pipeline {
    store: Arc<dyn ProductStore>,
    discovery: WorkDiscovery,
    fetcher: Option<Fetcher>,
    tracker: ProgressTracker,
    dead_letters: DeadLetterQueue,
    shutdown: watch::Receiver<bool>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ProductStore>,
        discovery: WorkDiscovery,
        fetcher: Option<Fetcher>,
        tracker: ProgressTracker,
        dead_letters: DeadLetterQueue,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            discovery,
            fetcher,
            tracker,
            dead_letters,
            shutdown,
            state: PipelineState::Init,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run to completion. Errors are returned only when the run could not get
    /// as far as processing, or when the final flush to storage failed.
    pub async fn run(mut self, params: RunParams) -> Result<RunStats, PipelineError> {
        // INIT
        params.validate()?;
        if params.mode.fetches_products() && self.fetcher.is_none() {
            return Err(PipelineError::FetcherUnavailable(params.mode.clone()));
        }
        tracing::info!(
            mode = %params.mode,
            skip = params.skip,
            limit = ?params.limit,
            batch_size = params.batch_size,
            force_refresh = params.force_refresh,
            "Starting pipeline"
        );
        let mut stats = RunStats::start(&params.mode);

        // DISCOVERING
        self.transition(PipelineState::Discovering);
        let (list, mut done) = self.build_work_list(&params).await?;
        stats.total = list.len();

        if !params.mode.fetches_products() {
            let progress = Progress {
                stats,
                cursor: 0,
                safe_position: 0,
                pending: Vec::new(),
                persisted: HashSet::new(),
                store_error: None,
            };
            return self.finalize(&params, &list, progress).await;
        }

        // LOADING_CHECKPOINT
        self.transition(PipelineState::LoadingCheckpoint);
        let start = self.resume_position(&params, list.len()).await;
        stats.skipped = start;

        // PROCESSING
        self.transition(PipelineState::Processing);
        let mut progress = Progress {
            stats,
            cursor: start,
            safe_position: start,
            pending: Vec::new(),
            persisted: HashSet::new(),
            store_error: None,
        };
        self.process(&params, &list, &mut done, &mut progress).await;

        self.finalize(&params, &list, progress).await
    }

    async fn build_work_list(
        &self,
        params: &RunParams,
    ) -> Result<(Vec<WorkItem>, HashSet<String>), PipelineError> {
        match &params.mode {
            RunMode::Single(identifier) => {
                let item = self.discovery.item_for(identifier).await;
                tracing::info!(sku = %item.identifier, "Processing single product");
                Ok((vec![item], HashSet::new()))
            }
            RunMode::RetryDeadLetters => {
                let items = params.slice(&self.dead_letters.work_items());
                tracing::info!(items = items.len(), "Retrying dead-lettered products");
                Ok((items, HashSet::new()))
            }
            RunMode::DiscoverOnly => {
                let discovery = self.discovery.list_all(params.force_refresh).await;
                Ok((discovery.items, HashSet::new()))
            }
            RunMode::Full | RunMode::ScrapeOnly => {
                let force = params.force_refresh && params.mode == RunMode::Full;
                let discovery = self.discovery.list_all(force).await;
                let done = self.store.existing_keys().await?;
                tracing::info!(stored = done.len(), "Loaded already processed products");

                let list = params.slice(&discovery.items);
                let unprocessed = list.iter().filter(|i| is_unprocessed(i, &done)).count();
                tracing::info!(
                    listed = discovery.items.len(),
                    selected = list.len(),
                    unprocessed,
                    skip = params.skip,
                    limit = ?params.limit,
                    "Prepared work list"
                );
                Ok((list, done))
            }
        }
    }

    async fn resume_position(&self, params: &RunParams, len: usize) -> usize {
        if !params.mode.uses_checkpoint() {
            return 0;
        }
        match self.tracker.load(CheckpointKind::Scrape).await {
            Some(checkpoint) => match checkpoint.resume_position(len, params.skip, params.limit) {
                Some(position) => {
                    tracing::info!(position, total = len, "Resuming from checkpoint");
                    position
                }
                None => {
                    tracing::info!(
                        position = checkpoint.cursor_position,
                        checkpoint_total = checkpoint.total,
                        checkpoint_skip = checkpoint.skip,
                        checkpoint_limit = ?checkpoint.limit,
                        total = len,
                        "Checkpoint does not apply to this work list, starting from the beginning"
                    );
                    0
                }
            },
            None => 0,
        }
    }

    /// Scrape checkpoint tagged with the run's `skip`/`limit` window.
    async fn save_checkpoint(
        &self,
        params: &RunParams,
        position: usize,
        total: usize,
    ) -> Result<Checkpoint, TrackerError> {
        let checkpoint = Checkpoint::new(position, total).with_window(params.skip, params.limit);
        self.tracker.save_checkpoint(CheckpointKind::Scrape, checkpoint).await
    }

    async fn process(
        &mut self,
        params: &RunParams,
        list: &[WorkItem],
        done: &mut HashSet<String>,
        progress: &mut Progress,
    ) {
        let total = list.len();
        let start = progress.cursor;

        for (position, item) in list.iter().enumerate().skip(start) {
            if self.shutdown_requested() {
                tracing::warn!(position, "Interrupted, finalizing");
                progress.stats.interrupted = true;
                break;
            }

            if !is_unprocessed(item, done) {
                if item.identifier.is_empty() {
                    tracing::warn!(locator = %item.locator, "Skipping item without identifier");
                } else {
                    tracing::debug!(sku = %item.identifier, "Already stored, skipping");
                }
                progress.stats.skipped += 1;
                metrics::counter!("scrape_items_skipped_total").increment(1);
            } else {
                let Some(fetcher) = self.fetcher.as_mut() else {
                    break;
                };
                // A fetch that already completed wins over a concurrent interrupt.
                let outcome = tokio::select! {
                    biased;
                    outcome = fetcher.fetch(item) => outcome,
                    _ = wait_for_shutdown(&mut self.shutdown) => {
                        tracing::warn!(position, sku = %item.identifier, "Interrupted during fetch, finalizing");
                        progress.stats.interrupted = true;
                        break;
                    }
                };
                done.insert(item.identifier.clone());
                self.record_outcome(item, outcome, progress).await;
            }

            progress.cursor = position + 1;
            if progress.pending.is_empty() {
                progress.safe_position = progress.cursor;
            }

            let pct = progress.cursor as f64 / total as f64 * 100.0;
            tracing::info!(
                position = progress.cursor,
                total,
                progress_pct = format!("{pct:.1}"),
                sku = %item.identifier,
                "Progress"
            );

            if progress.pending.len() >= params.batch_size {
                if let Err(e) = self.flush(progress).await {
                    tracing::error!(error = %e, "Failed to save batch, finalizing");
                    progress.store_error = Some(e);
                    break;
                }
            }

            let visited = progress.cursor - start;
            if params.mode.uses_checkpoint() && visited % params.checkpoint_every == 0 {
                if let Err(e) = self.save_checkpoint(params, progress.safe_position, total).await {
                    tracing::warn!(error = %e, "Failed to save checkpoint");
                }
            }
        }
    }

    async fn record_outcome(&mut self, item: &WorkItem, outcome: FetchOutcome, progress: &mut Progress) {
        let failure = match outcome {
            FetchOutcome::Fetched(payload) => match normalize(&item.identifier, &payload) {
                Ok(record) => {
                    tracing::info!(sku = %record.key, name = %record.attributes.name, "Processed product");
                    progress.pending.push(record);
                    progress.stats.processed += 1;
                    metrics::counter!("scrape_items_processed_total").increment(1);
                    return;
                }
                Err(e) => e.to_string(),
            },
            FetchOutcome::Exhausted(e) | FetchOutcome::Permanent(e) => e.to_string(),
        };

        tracing::error!(sku = %item.identifier, error = %failure, "Failed to process product");
        progress.stats.failed += 1;
        metrics::counter!("scrape_items_failed_total").increment(1);

        if let Err(e) = self.dead_letters.push(item, &failure).await {
            tracing::warn!(sku = %item.identifier, error = %e, "Failed to write dead-letter entry");
        }
    }

    /// Persist the pending batch. One record goes through `upsert_one`.
    async fn flush(&self, progress: &mut Progress) -> Result<(), StoreError> {
        match progress.pending.as_slice() {
            [] => return Ok(()),
            [record] => {
                self.store.upsert_one(record).await?;
            }
            records => {
                self.store.upsert_many(records).await?;
            }
        }

        progress
            .persisted
            .extend(progress.pending.drain(..).map(|r| r.key));
        progress.safe_position = progress.cursor;
        Ok(())
    }

    async fn finalize(
        mut self,
        params: &RunParams,
        list: &[WorkItem],
        mut progress: Progress,
    ) -> Result<RunStats, PipelineError> {
        self.transition(PipelineState::Finalizing);

        if let Err(e) = self.flush(&mut progress).await {
            tracing::error!(error = %e, unsaved = progress.pending.len(), "Failed to save final batch");
            progress.store_error = Some(e);
        } else if progress.store_error.is_some() {
            tracing::info!("Saved pending products after an earlier storage failure");
            progress.store_error = None;
        }

        let final_position = if progress.store_error.is_some() {
            progress.safe_position
        } else {
            progress.cursor
        };

        if params.mode.uses_checkpoint() && !list.is_empty() {
            if let Err(e) = self.save_checkpoint(params, final_position, list.len()).await {
                tracing::warn!(error = %e, "Failed to save final checkpoint");
            }
        }

        let mut stats = progress.stats;
        stats.final_position = final_position;
        stats.finish();

        if let Err(e) = self.store.record_run(&stats).await {
            tracing::warn!(error = %e, "Failed to record run statistics");
        }

        if !progress.persisted.is_empty() {
            if let Err(e) = self.dead_letters.resolve(&progress.persisted).await {
                tracing::warn!(error = %e, "Failed to update dead-letter file");
            }
        }

        if let Err(e) = self.store.close().await {
            tracing::warn!(error = %e, "Failed to close storage");
        }

        tracing::info!(
            run_id = %stats.run_id,
            mode = %stats.mode,
            total = stats.total,
            processed = stats.processed,
            failed = stats.failed,
            skipped = stats.skipped,
            final_position = stats.final_position,
            interrupted = stats.interrupted,
            elapsed_secs = format!("{:.2}", stats.elapsed_secs),
            "Run complete"
        );

        match progress.store_error {
            Some(e) => Err(e.into()),
            None => {
                self.transition(PipelineState::Done);
                Ok(stats)
            }
        }
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
