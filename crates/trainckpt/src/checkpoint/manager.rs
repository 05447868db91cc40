//! Checkpoint manager for automatic rotation and best checkpoint tracking.

use super::state::CheckpointState;
use crate::engine::StateStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const EPOCH_PREFIX: &str = "checkpoint_epoch_";
const EXTENSION: &str = "json";
const BEST_FILE: &str = "checkpoint_best.json";

/// Direction in which the tracked metric improves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGoal {
    /// Higher is better (accuracy, reward)
    Maximize,
    /// Lower is better (loss, perplexity)
    Minimize,
}

impl MetricGoal {
    /// NaN never improves on anything.
    fn improves(self, candidate: f64, best: Option<f64>) -> bool {
        if candidate.is_nan() {
            return false;
        }
        match (self, best) {
            (_, None) => true,
            (MetricGoal::Maximize, Some(best)) => candidate > best,
            (MetricGoal::Minimize, Some(best)) => candidate < best,
        }
    }
}

/// Where and how often a [`CheckpointManager`] writes checkpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub checkpoint_dir: PathBuf,
    /// Epoch interval for `maybe_save` (0 disables it)
    pub interval: u64,
    /// Epoch checkpoints kept on disk (0 = unlimited)
    pub retain: usize,
    /// Goal used to maintain `checkpoint_best.json`; `None` skips it
    pub best_metric: Option<MetricGoal>,
    /// Write optimizer state, needed to resume training exactly
    pub include_optimizer_state: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            interval: 10,
            retain: 5,
            best_metric: Some(MetricGoal::Maximize),
            include_optimizer_state: false,
        }
    }
}

impl CheckpointConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    pub fn interval(mut self, epochs: u64) -> Self {
        self.interval = epochs;
        self
    }

    pub fn retain(mut self, checkpoints: usize) -> Self {
        self.retain = checkpoints;
        self
    }

    /// Keep a copy of the checkpoint whose metric best meets `goal`.
    pub fn track_best(mut self, goal: MetricGoal) -> Self {
        self.best_metric = Some(goal);
        self
    }

    pub fn without_best(mut self) -> Self {
        self.best_metric = None;
        self
    }

    pub fn include_optimizer_state(mut self, enabled: bool) -> Self {
        self.include_optimizer_state = enabled;
        self
    }
}

/// Manages epoch-numbered checkpoint files in one directory.
///
/// # Example
///
/// ```ignore
/// let config = CheckpointConfig::new("./checkpoints")
///     .interval(100)
///     .retain(3)
///     .track_best(MetricGoal::Minimize)
///     .include_optimizer_state(true);
///
/// let mut manager = CheckpointManager::new(config);
///
/// // In training loop:
/// if let Some(path) = manager.maybe_save(&state, epoch, val_loss)? {
///     tracing::info!(path = %path.display(), "checkpointed");
/// }
///
/// // To resume:
/// if let Some((epoch, state)) = manager.load_latest::<SessionState>()? {
///     tracing::info!(epoch, "resumed");
/// }
/// ```
pub struct CheckpointManager {
    config: CheckpointConfig,
    best: Option<f64>,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&config.checkpoint_dir) {
            tracing::warn!(dir = %config.checkpoint_dir.display(), "Failed to create checkpoint directory: {}", e);
        }

        Self { config, best: None }
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Save if `epoch` is a positive multiple of the configured interval.
    ///
    /// Returns the path to the saved checkpoint, or None if no save was performed.
    pub fn maybe_save<S: StateStore>(
        &mut self,
        state: &CheckpointState<S>,
        epoch: u64,
        metric: f64,
    ) -> Result<Option<PathBuf>> {
        let interval = self.config.interval;
        if epoch == 0 || interval == 0 || epoch % interval != 0 {
            return Ok(None);
        }

        self.save(state, epoch, metric).map(Some)
    }

    /// Save a checkpoint for `epoch` unconditionally, then rotate.
    pub fn save<S: StateStore>(
        &mut self,
        state: &CheckpointState<S>,
        epoch: u64,
        metric: f64,
    ) -> Result<PathBuf> {
        let path = self.epoch_path(epoch);
        CheckpointState::save_checkpoint(state, &path, self.config.include_optimizer_state)?;

        if let Some(goal) = self.config.best_metric {
            if goal.improves(metric, self.best) {
                self.best = Some(metric);
                fs::copy(&path, self.config.checkpoint_dir.join(BEST_FILE))?;
                tracing::info!(metric, epoch, "New best checkpoint");
            }
        }

        if self.config.retain > 0 {
            self.prune()?;
        }

        Ok(path)
    }

    /// Load the checkpoint with the highest epoch number.
    pub fn load_latest<S: StateStore>(&self) -> Result<Option<(u64, CheckpointState<S>)>> {
        let Some((epoch, path)) = self.epoch_files()?.pop() else {
            return Ok(None);
        };

        let state = CheckpointState::load_checkpoint(&path)?;
        Ok(Some((epoch, state)))
    }

    /// Load the best checkpoint, if one was saved.
    pub fn load_best<S: StateStore>(&self) -> Result<Option<CheckpointState<S>>> {
        let best_path = self.config.checkpoint_dir.join(BEST_FILE);
        if !best_path.exists() {
            return Ok(None);
        }
        CheckpointState::load_checkpoint(&best_path).map(Some)
    }

    /// Epoch checkpoint files in ascending epoch order.
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .epoch_files()?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    fn epoch_files(&self) -> Result<Vec<(u64, PathBuf)>> {
        let entries = match fs::read_dir(&self.config.checkpoint_dir) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };

        let mut files: Vec<(u64, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(EXTENSION))
            .filter_map(|p| extract_epoch(&p).map(|epoch| (epoch, p)))
            .collect();

        // Numeric order; zero padding runs out past six digits.
        files.sort_by_key(|(epoch, _)| *epoch);
        Ok(files)
    }

    fn epoch_path(&self, epoch: u64) -> PathBuf {
        self.config
            .checkpoint_dir
            .join(format!("{}{:06}.{}", EPOCH_PREFIX, epoch, EXTENSION))
    }

    fn prune(&self) -> Result<()> {
        let files = self.epoch_files()?;
        let excess = files.len().saturating_sub(self.config.retain);

        for (epoch, old) in files.into_iter().take(excess) {
            match fs::remove_file(&old) {
                Ok(()) => tracing::debug!(epoch, path = %old.display(), "Removed old checkpoint"),
                Err(e) => {
                    tracing::warn!(epoch, path = %old.display(), "Failed to remove old checkpoint: {}", e)
                }
            }
        }

        Ok(())
    }
}

fn extract_epoch(path: &Path) -> Option<u64> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix(EPOCH_PREFIX))
        .and_then(|s| s.parse().ok())
}
