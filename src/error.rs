use std::path::PathBuf;

/// Errors raised by a collaborator's state-export/import contract.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to encode state: {0}")]
    Encode(String),

    #[error("failed to decode state: {0}")]
    Decode(String),

    #[error("shape mismatch for '{name}': expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("unknown parameter group '{0}'")]
    UnknownGroup(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

impl StateError {
    /// Whether the error means the blob does not fit the receiving object,
    /// as opposed to a failure of the export machinery itself.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StateError::Encode(_))
    }
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to create checkpoint directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint record: {0}")]
    Encode(String),

    #[error("malformed checkpoint {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("model state error: {0}")]
    Model(#[source] StateError),

    #[error("optimizer state error: {0}")]
    Optimizer(#[source] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}
