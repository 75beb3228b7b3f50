use std::fs;
use std::path::Path;

use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use burn::tensor::backend::Backend;

use crate::checkpoint::record::{CheckpointRecord, Extra};
use crate::checkpoint::state::{ModelState, OptimizerState};
use crate::error::{CheckpointError, StateError};
use crate::rng::RngContext;

/// Options for [`load_checkpoint`].
#[derive(Debug, Clone)]
pub struct LoadOptions<D> {
    /// Device every restored tensor is placed on.
    pub device: D,
    /// Fail on optimizer state that does not fit the fresh optimizer.
    /// When false, such state is skipped with a warning.
    pub strict_optimizer: bool,
}

impl<D: Default> Default for LoadOptions<D> {
    fn default() -> Self {
        LoadOptions {
            device: D::default(),
            strict_optimizer: true,
        }
    }
}

/// Result of [`load_checkpoint`].
#[derive(Debug)]
pub struct LoadedCheckpoint<M, O> {
    pub model: M,
    pub optimizer: O,
    pub step: u64,
    pub record: CheckpointRecord,
}

fn recorder() -> NamedMpkBytesRecorder<FullPrecisionSettings> {
    NamedMpkBytesRecorder::default()
}

/// Encode `record` with burn's named MessagePack recorder and write it to
/// `path`, creating the parent directories first.
pub fn write_record<B: Backend>(path: &Path, record: CheckpointRecord) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| CheckpointError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    let bytes = Recorder::<B>::record(&recorder(), record, ())
        .map_err(|e| CheckpointError::Encode(e.to_string()))?;
    fs::write(path, bytes).map_err(|e| CheckpointError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read and decode the record at `path` without touching any collaborator.
pub fn read_record<B: Backend>(path: &Path, device: &B::Device) -> Result<CheckpointRecord, CheckpointError> {
    if !path.is_file() {
        return Err(CheckpointError::NotFound(path.to_path_buf()));
    }

    let bytes = fs::read(path).map_err(|e| CheckpointError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    Recorder::<B>::load(&recorder(), bytes, device).map_err(|e| CheckpointError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Save model, optimizer, step and RNG state to a single file at `path`.
///
/// The file is created or overwritten. A failed write may leave a truncated
/// file behind.
pub fn save_checkpoint<M, O>(
    path: &Path,
    model: &M,
    optimizer: &O,
    step: u64,
    rng: &RngContext,
    extra: Option<Extra>,
) -> Result<(), CheckpointError>
where
    M: ModelState,
    O: OptimizerState,
{
    let record = CheckpointRecord {
        model: model.export_state().map_err(CheckpointError::Model)?,
        optimizer: optimizer.export_state().map_err(CheckpointError::Optimizer)?,
        step,
        rng_state: Some(rng.host_state()),
        device_rng_states: Some(rng.device_states()),
        extra,
    };

    write_record::<M::Backend>(path, record)?;
    tracing::info!("Checkpoint saved to {}", path.display());
    Ok(())
}

/// Restore a training session from the checkpoint at `path`.
///
/// The model is rebuilt by `restore_model`, then `make_optimizer` builds a
/// fresh optimizer for it and the saved optimizer state is imported. RNG
/// states found in the record are assigned into `rng`; missing ones leave it
/// untouched.
pub fn load_checkpoint<M, O, FM, FO>(
    path: &Path,
    restore_model: FM,
    make_optimizer: FO,
    rng: &mut RngContext,
    options: &LoadOptions<<M::Backend as Backend>::Device>,
) -> Result<LoadedCheckpoint<M, O>, CheckpointError>
where
    M: ModelState,
    O: OptimizerState<Backend = M::Backend>,
    FM: FnOnce(&[u8], &<M::Backend as Backend>::Device) -> Result<M, StateError>,
    FO: FnOnce(&M) -> O,
{
    if !path.is_file() {
        return Err(CheckpointError::NotFound(path.to_path_buf()));
    }

    tracing::info!("Loading checkpoint from {}", path.display());
    let record = read_record::<M::Backend>(path, &options.device)?;

    let model = restore_model(&record.model, &options.device).map_err(CheckpointError::Model)?;
    let mut optimizer = make_optimizer(&model);

    match optimizer.import_state(&record.optimizer, &options.device) {
        Ok(()) => {}
        Err(err) if !options.strict_optimizer && err.is_recoverable() => {
            tracing::warn!("Could not load optimizer state strictly: {err}");
        }
        Err(err) => return Err(CheckpointError::Optimizer(err)),
    }

    if let Some(state) = &record.rng_state {
        rng.set_host_state(state);
    }
    if let Some(states) = &record.device_rng_states {
        rng.set_device_states(states);
    }

    let step = record.step;
    tracing::info!(
        "Checkpoint loaded: step={}, {}",
        step,
        model.diagnostic()
    );

    Ok(LoadedCheckpoint {
        model,
        optimizer,
        step,
        record,
    })
}
