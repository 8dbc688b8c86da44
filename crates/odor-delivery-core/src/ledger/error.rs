//! Ledger errors

use std::path::PathBuf;
use thiserror::Error;

/// Protocol-ordering violations detected while recording a trial
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    /// An event arrived that the current trial state does not allow
    #[error("Trial {trial}: {event} arrived out of order (expected {expected})")]
    OutOfOrder {
        trial: usize,
        event: &'static str,
        expected: &'static str,
    },
}

/// Failure to write one of the session's output files
#[derive(Error, Debug)]
pub enum PersistError {
    /// Underlying file-system error
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
