//! Checkpoint persistence: the on-disk record, save/load orchestration,
//! the collaborator contracts it calls into, and step-named directory
//! management.

mod manager;
mod persist;
mod record;
mod state;

pub use manager::{
    checkpoint_file_name, parse_checkpoint_step, CheckpointManager, CheckpointManagerConfig,
};
pub use persist::{
    load_checkpoint, read_record, save_checkpoint, write_record, LoadOptions, LoadedCheckpoint,
};
pub use record::{CheckpointRecord, Extra};
pub use state::{ModelState, OptimizerState};
