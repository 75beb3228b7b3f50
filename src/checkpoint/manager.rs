use std::fs;
use std::path::PathBuf;

use crate::checkpoint::persist::{load_checkpoint, save_checkpoint, LoadOptions, LoadedCheckpoint};
use crate::checkpoint::record::Extra;
use crate::checkpoint::state::{ModelState, OptimizerState};
use crate::error::{CheckpointError, StateError};
use crate::rng::RngContext;

use burn::tensor::backend::Backend;

const FILE_PREFIX: &str = "chkpnt";
const FILE_EXTENSION: &str = "ckpt";

/// Configuration for the checkpoint manager.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CheckpointManagerConfig {
    pub checkpoint_dir: PathBuf,
    /// Save every this many steps.
    pub interval: u64,
    /// Number of most recent checkpoints kept after a save; 0 keeps all.
    pub keep_last_n: usize,
    /// Fail on optimizer state that does not fit when resuming.
    pub strict_optimizer: bool,
}

impl Default for CheckpointManagerConfig {
    fn default() -> Self {
        CheckpointManagerConfig {
            checkpoint_dir: PathBuf::from("checkpoints"),
            interval: 7_000,
            keep_last_n: 0,
            strict_optimizer: true,
        }
    }
}

/// File name of the checkpoint for a step, e.g. `chkpnt0007000.ckpt`.
pub fn checkpoint_file_name(step: u64) -> String {
    format!("{FILE_PREFIX}{step:07}.{FILE_EXTENSION}")
}

/// Step encoded in a checkpoint file name, if it is one.
pub fn parse_checkpoint_step(file_name: &str) -> Option<u64> {
    let digits = file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?
        .strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Saves, lists, prunes and resumes step-named checkpoints in one directory.
pub struct CheckpointManager {
    config: CheckpointManagerConfig,
}

impl CheckpointManager {
    pub fn new(config: CheckpointManagerConfig) -> Self {
        CheckpointManager { config }
    }

    pub fn config(&self) -> &CheckpointManagerConfig {
        &self.config
    }

    pub fn path_for_step(&self, step: u64) -> PathBuf {
        self.config.checkpoint_dir.join(checkpoint_file_name(step))
    }

    /// Whether `step` falls on the save interval.
    pub fn is_due(&self, step: u64) -> bool {
        self.config.interval > 0 && step > 0 && step % self.config.interval == 0
    }

    /// Save under the step-derived name, then prune.
    pub fn save<M, O>(
        &self,
        model: &M,
        optimizer: &O,
        step: u64,
        rng: &RngContext,
        extra: Option<Extra>,
    ) -> Result<PathBuf, CheckpointError>
    where
        M: ModelState,
        O: OptimizerState,
    {
        let path = self.path_for_step(step);
        save_checkpoint(&path, model, optimizer, step, rng, extra)?;
        self.prune_old_checkpoints()?;
        Ok(path)
    }

    /// All checkpoints in the directory, sorted by step (ascending). A
    /// missing directory has no checkpoints.
    pub fn list_checkpoints(&self) -> Result<Vec<(u64, PathBuf)>, CheckpointError> {
        let dir = &self.config.checkpoint_dir;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(step) = parse_checkpoint_step(&name.to_string_lossy()) {
                results.push((step, path));
            }
        }
        results.sort_by_key(|(step, _)| *step);
        Ok(results)
    }

    pub fn latest(&self) -> Result<Option<(u64, PathBuf)>, CheckpointError> {
        Ok(self.list_checkpoints()?.pop())
    }

    /// Load the most recent checkpoint, or `None` when there is none.
    pub fn load_latest<M, O, FM, FO>(
        &self,
        restore_model: FM,
        make_optimizer: FO,
        rng: &mut RngContext,
        device: &<M::Backend as Backend>::Device,
    ) -> Result<Option<LoadedCheckpoint<M, O>>, CheckpointError>
    where
        M: ModelState,
        O: OptimizerState<Backend = M::Backend>,
        FM: FnOnce(&[u8], &<M::Backend as Backend>::Device) -> Result<M, StateError>,
        FO: FnOnce(&M) -> O,
    {
        let Some((_, path)) = self.latest()? else {
            return Ok(None);
        };
        let options = LoadOptions {
            device: device.clone(),
            strict_optimizer: self.config.strict_optimizer,
        };
        load_checkpoint(&path, restore_model, make_optimizer, rng, &options).map(Some)
    }

    /// Keep only the last N checkpoints by step.
    fn prune_old_checkpoints(&self) -> Result<(), CheckpointError> {
        if self.config.keep_last_n == 0 {
            return Ok(());
        }
        let checkpoints = self.list_checkpoints()?;
        let excess = checkpoints.len().saturating_sub(self.config.keep_last_n);
        for (step, path) in checkpoints.into_iter().take(excess) {
            tracing::debug!(step, "Pruning checkpoint {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
