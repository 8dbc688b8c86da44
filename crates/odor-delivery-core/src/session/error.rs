//! Session errors

use std::path::PathBuf;
use thiserror::Error;

use crate::ledger::RecorderError;
use crate::link::LinkError;

/// Invalid session parameters
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be a positive number of seconds")]
    NonPositiveSeconds { field: &'static str },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} must not contain path separators: {value:?}")]
    PathInField { field: &'static str, value: String },

    #[error("Unknown panel: {0} (expected 1% or 10%)")]
    UnknownPanel(String),

    #[error("Odor identifiers must be positive (trial {trial} has 0)")]
    ZeroOdor { trial: usize },

    #[error("Invalid odor identifier: {0:?}")]
    InvalidOdor(String),

    #[error("Failed to read settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that end a running session with `LinkLost`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}
