//! Single-writer façade over the export checkpoint.
//!
//! Downloads complete concurrently, but every completion goes through one
//! mutex-guarded state so the completed/pending sets and the flush counter
//! are never updated by two writers at once. Trackers for several categories
//! of one session share that state through [`CheckpointTracker::for_category`];
//! writes also fold in completions already on disk for the same session, so
//! independently loaded trackers never drop each other's progress.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use exfig_common::Result;

use crate::checkpoint::{
    config_fingerprint, CategoryItems, ExportCheckpoint, ItemCategory, DEFAULT_CHECKPOINT_TTL,
};

/// Single completions accumulated before the checkpoint is written.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 5;

/// Tuning for checkpoint validity and flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerOptions {
    pub ttl: Duration,
    pub flush_threshold: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CHECKPOINT_TTL,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

/// Completed/pending counts for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointProgress {
    pub completed: usize,
    pub pending: usize,
}

impl CheckpointProgress {
    pub fn total(&self) -> usize {
        self.completed + self.pending
    }
}

/// What [`CheckpointTracker::finalize`] did with the checkpoint file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Everything finished; the file was removed.
    Completed,
    /// Work remains; the file was written for the next run.
    Persisted,
}

struct TrackerState {
    checkpoint: ExportCheckpoint,
    unflushed: usize,
}

/// Records completions for one category of an export session.
#[derive(Clone)]
pub struct CheckpointTracker {
    state: Arc<Mutex<TrackerState>>,
    path: PathBuf,
    category: ItemCategory,
    flush_threshold: usize,
}

impl CheckpointTracker {
    fn from_checkpoint(
        checkpoint: ExportCheckpoint,
        path: PathBuf,
        category: ItemCategory,
        options: TrackerOptions,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                checkpoint,
                unflushed: 0,
            })),
            path,
            category,
            flush_threshold: options.flush_threshold.max(1),
        }
    }

    /// Resume the checkpoint in `directory` if it is still valid.
    ///
    /// Returns `None` when there is no checkpoint, when it cannot be read,
    /// when it holds nothing of `category`, or when it is expired or was made
    /// for a different configuration. In the last two cases the stale file is
    /// deleted.
    pub async fn load_if_valid(
        config_path: &Path,
        directory: &Path,
        category: ItemCategory,
    ) -> Option<Self> {
        Self::load_if_valid_with(config_path, directory, category, TrackerOptions::default()).await
    }

    pub async fn load_if_valid_with(
        config_path: &Path,
        directory: &Path,
        category: ItemCategory,
        options: TrackerOptions,
    ) -> Option<Self> {
        let path = ExportCheckpoint::path_in(directory);

        let checkpoint = match ExportCheckpoint::load(&path).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return None,
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                return None;
            }
        };

        if checkpoint.is_expired(options.ttl) {
            info!("checkpoint expired, starting fresh");
            Self::discard(&path).await;
            return None;
        }

        let fingerprint = match config_fingerprint(config_path).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!(
                    "Cannot fingerprint config {}, ignoring checkpoint: {}",
                    config_path.display(),
                    e
                );
                return None;
            }
        };

        if !checkpoint.matches_config(&fingerprint) {
            info!("checkpoint config changed, starting fresh");
            Self::discard(&path).await;
            return None;
        }

        if !checkpoint.tracks(category) {
            info!(
                "checkpoint {} has no {}, starting fresh",
                checkpoint.export_id, category
            );
            return None;
        }

        info!(
            "Resuming {} export {}: {} completed, {} pending",
            category,
            checkpoint.export_id,
            checkpoint.completed.count_in(category),
            checkpoint.pending.count_in(category)
        );
        Some(Self::from_checkpoint(checkpoint, path, category, options))
    }

    async fn discard(path: &Path) {
        if let Err(e) = ExportCheckpoint::delete(path).await {
            warn!("Failed to delete stale checkpoint {}: {}", path.display(), e);
        }
    }

    /// Start a new session with every candidate pending and write it out.
    ///
    /// # Errors
    /// - The config file cannot be read
    /// - The checkpoint cannot be written
    pub async fn start(
        config_path: &Path,
        directory: &Path,
        category: ItemCategory,
        pending: CategoryItems,
        options: TrackerOptions,
    ) -> Result<Self> {
        let fingerprint = config_fingerprint(config_path).await?;
        let checkpoint = ExportCheckpoint::new(
            fingerprint,
            config_path.display().to_string(),
            pending,
        );
        let path = ExportCheckpoint::path_in(directory);
        checkpoint.save(&path).await?;

        debug!("Started {} export {}", category, checkpoint.export_id);
        Ok(Self::from_checkpoint(checkpoint, path, category, options))
    }

    /// Resume a valid checkpoint or start a new session from `pending`.
    pub async fn resume_or_start(
        config_path: &Path,
        directory: &Path,
        category: ItemCategory,
        pending: CategoryItems,
        options: TrackerOptions,
    ) -> Result<Self> {
        match Self::load_if_valid_with(config_path, directory, category, options).await {
            Some(tracker) => Ok(tracker),
            None => Self::start(config_path, directory, category, pending, options).await,
        }
    }

    /// A tracker for `category` of the same session, sharing this one's state.
    pub fn for_category(&self, category: ItemCategory) -> Self {
        Self {
            state: self.state.clone(),
            path: self.path.clone(),
            category,
            flush_threshold: self.flush_threshold,
        }
    }

    pub fn category(&self) -> ItemCategory {
        self.category
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one completion.
    ///
    /// The checkpoint is written once every `flush_threshold` completions;
    /// call [`save`](Self::save) to force a write.
    pub async fn mark_completed(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.checkpoint.mark_completed(self.category, name);
        state.unflushed += 1;

        if state.unflushed >= self.flush_threshold {
            self.flush_locked(&mut state).await;
        }
    }

    /// Record a batch of completions and write the checkpoint immediately.
    pub async fn mark_all_completed<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.lock().await;
        for name in names {
            state.checkpoint.mark_completed(self.category, name.as_ref());
        }
        self.flush_locked(&mut state).await;
    }

    async fn flush_locked(&self, state: &mut TrackerState) {
        if let Err(e) = self.write_locked(state).await {
            warn!("Failed to write checkpoint {}: {}", self.path.display(), e);
        }
    }

    /// Pull in completions on disk for this session, then write.
    async fn write_locked(&self, state: &mut TrackerState) -> Result<()> {
        self.absorb_on_disk(state).await;
        state.checkpoint.save(&self.path).await?;
        state.unflushed = 0;
        Ok(())
    }

    async fn absorb_on_disk(&self, state: &mut TrackerState) {
        match ExportCheckpoint::load(&self.path).await {
            Ok(Some(on_disk)) => {
                let moved = state.checkpoint.absorb_completed(&on_disk);
                if moved > 0 {
                    debug!("Merged {} completions from {}", moved, self.path.display());
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Overwriting unreadable checkpoint {}: {}", self.path.display(), e),
        }
    }

    pub async fn is_completed(&self, name: &str) -> bool {
        self.state
            .lock()
            .await
            .checkpoint
            .is_completed(self.category, name)
    }

    /// Drop candidates whose logical name is already completed.
    pub async fn filter_pending<T, F>(&self, candidates: Vec<T>, name_of: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        let state = self.state.lock().await;
        let before = candidates.len();
        let remaining: Vec<T> = candidates
            .into_iter()
            .filter(|candidate| !state.checkpoint.is_completed(self.category, name_of(candidate)))
            .collect();

        if remaining.len() < before {
            debug!(
                "Skipping {} already exported {}",
                before - remaining.len(),
                self.category
            );
        }
        remaining
    }

    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.checkpoint.is_complete()
    }

    /// Progress within this tracker's category.
    pub async fn progress(&self) -> CheckpointProgress {
        let state = self.state.lock().await;
        CheckpointProgress {
            completed: state.checkpoint.completed.count_in(self.category),
            pending: state.checkpoint.pending.count_in(self.category),
        }
    }

    /// Copy of the current in-memory checkpoint.
    pub async fn snapshot(&self) -> ExportCheckpoint {
        self.state.lock().await.checkpoint.clone()
    }

    /// Write the checkpoint now.
    pub async fn save(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.write_locked(&mut state).await
    }

    /// Remove the checkpoint file.
    pub async fn delete(&self) -> Result<()> {
        let _state = self.state.lock().await;
        ExportCheckpoint::delete(&self.path).await?;
        Ok(())
    }

    /// Delete the checkpoint if the session is complete, otherwise flush it.
    pub async fn finalize(&self) -> Result<CheckpointOutcome> {
        let mut state = self.state.lock().await;
        self.absorb_on_disk(&mut state).await;
        if state.checkpoint.is_complete() {
            ExportCheckpoint::delete(&self.path).await?;
            info!("Export {} complete, checkpoint removed", state.checkpoint.export_id);
            Ok(CheckpointOutcome::Completed)
        } else {
            state.checkpoint.save(&self.path).await?;
            state.unflushed = 0;
            info!(
                "Export {} incomplete, {} items left for the next run",
                state.checkpoint.export_id,
                state.checkpoint.pending.count()
            );
            Ok(CheckpointOutcome::Persisted)
        }
    }
}
