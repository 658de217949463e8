use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::dead_letter::DeadLetterEntry;
use crate::models::work_item::WorkItem;
use crate::services::progress::write_atomic;

#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("Failed to write dead-letter file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize dead-letter file: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Permanently failed work items, one entry per identifier, kept in a JSON file.
#[derive(Debug)]
pub struct DeadLetterQueue {
    path: PathBuf,
    entries: Vec<DeadLetterEntry>,
}

impl DeadLetterQueue {
    /// Load the file at `path`. A missing or corrupted file starts an empty queue.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<DeadLetterEntry>>(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Dead-letter file was corrupted, starting a new one");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read dead-letter file");
                Vec::new()
            }
        };

        metrics::gauge!("dead_letter_entries").set(entries.len() as f64);
        Self { path, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DeadLetterEntry] {
        &self.entries
    }

    /// The failed items, in the order they first failed.
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.entries.iter().map(|e| e.work_item.clone()).collect()
    }

    /// Record a failure. A repeat failure replaces the earlier entry and
    /// counts the attempt.
    pub async fn push(&mut self, item: &WorkItem, reason: &str) -> Result<(), DeadLetterError> {
        match self
            .entries
            .iter_mut()
            .find(|e| e.work_item.identifier == item.identifier)
        {
            Some(existing) => {
                let attempts = existing.attempts + 1;
                *existing = DeadLetterEntry::new(item.clone(), reason);
                existing.attempts = attempts;
            }
            None => self.entries.push(DeadLetterEntry::new(item.clone(), reason)),
        }

        tracing::warn!(sku = %item.identifier, reason, "Added to dead-letter file");
        self.save().await
    }

    /// Drop entries for identifiers that have since been stored. Returns how many were removed.
    pub async fn resolve(&mut self, succeeded: &HashSet<String>) -> Result<usize, DeadLetterError> {
        let before = self.entries.len();
        self.entries
            .retain(|e| !succeeded.contains(&e.work_item.identifier));
        let removed = before - self.entries.len();

        if removed > 0 {
            tracing::info!(removed, remaining = self.entries.len(), "Resolved dead-letter entries");
            self.save().await?;
        }
        Ok(removed)
    }

    async fn save(&self) -> Result<(), DeadLetterError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&self.path, &serde_json::to_vec_pretty(&self.entries)?).await?;
        metrics::gauge!("dead_letter_entries").set(self.entries.len() as f64);
        Ok(())
    }
}
