//! Errors in the library.
use thiserror::Error;

/// Errors raised by the feudal crates.
#[derive(Error, Debug)]
pub enum FeudalError {
    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),

    /// Invalid configuration of a network.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A rollout does not have the expected contents.
    #[error("Invalid rollout: {0}")]
    InvalidRollout(String),

    /// No checkpoint was found in the directory.
    #[error("No checkpoint found in {0}")]
    CheckpointNotFound(String),
}
