use std::path::{Path, PathBuf};

use crate::models::checkpoint::{Checkpoint, CheckpointKind};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Failed to write checkpoint: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable checkpoints, one JSON file per [`CheckpointKind`].
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    dir: PathBuf,
}

impl ProgressTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(format!("checkpoint_{kind}.json"))
    }

    /// Overwrite the checkpoint of `kind`.
    pub async fn save(
        &self,
        kind: CheckpointKind,
        position: usize,
        total: usize,
    ) -> Result<Checkpoint, TrackerError> {
        self.save_checkpoint(kind, Checkpoint::new(position, total)).await
    }

    /// Overwrite the checkpoint of `kind` with a prepared checkpoint.
    pub async fn save_checkpoint(
        &self,
        kind: CheckpointKind,
        checkpoint: Checkpoint,
    ) -> Result<Checkpoint, TrackerError> {
        let path = self.path(kind);

        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&path, &serde_json::to_vec_pretty(&checkpoint)?).await?;

        tracing::debug!(
            kind = %kind,
            position = checkpoint.cursor_position,
            total = checkpoint.total,
            progress_pct = format!("{:.2}", checkpoint.progress_pct),
            "Checkpoint saved"
        );
        Ok(checkpoint)
    }

    /// Last saved checkpoint of `kind`. Missing or unreadable files yield `None`.
    pub async fn load(&self, kind: CheckpointKind) -> Option<Checkpoint> {
        let path = self.path(kind);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read checkpoint, starting fresh");
                return None;
            }
        };

        match serde_json::from_slice::<Checkpoint>(&bytes) {
            Ok(checkpoint) => {
                tracing::info!(
                    kind = %kind,
                    position = checkpoint.cursor_position,
                    total = checkpoint.total,
                    "Loaded checkpoint"
                );
                Some(checkpoint)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Checkpoint is corrupted, starting fresh");
                None
            }
        }
    }
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
