//! Trial Ledger
//!
//! Timestamps each trial's trigger, valve-open and valve-close events and
//! keeps the ordered list of completed trials, both in memory and on disk.

mod error;
mod format;
mod recorder;

pub use error::{PersistError, RecorderError};
pub use format::{SessionFiles, SESSION_STAMP_FORMAT, TIMESTAMP_FORMAT};
pub use recorder::Recorder;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// One completed trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Trial number, starting at 1
    pub trial: usize,
    /// Odor (valve) delivered
    pub odor: u8,
    /// When the microscope trigger was reported
    pub triggered_at: DateTime<Local>,
    /// When the valve opened
    pub opened_at: DateTime<Local>,
    /// When the valve closed
    pub closed_at: DateTime<Local>,
}

/// Shared, append-only list of completed trials.
///
/// Cloning is cheap and every clone sees the same records. Only the session
/// worker appends; any thread may take a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Arc<RwLock<Vec<TrialRecord>>>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the records completed so far
    pub fn snapshot(&self) -> Vec<TrialRecord> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of completed trials
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether no trial has completed yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&self, record: TrialRecord) {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }
}
