//! Trial recorder
//!
//! Stamps protocol events as they are handled and appends a [`TrialRecord`]
//! once a trial's valve has closed.

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use super::{Ledger, RecorderError, TrialRecord};

/// Trial between its trigger and its valve-close
#[derive(Debug, Clone)]
struct PendingTrial {
    /// Zero-based trial index
    index: usize,
    odor: u8,
    triggered_at: DateTime<Local>,
    opened_at: Option<DateTime<Local>>,
}

/// Records event timestamps for the running session
pub struct Recorder {
    /// Completed trials, shared with observers
    ledger: Ledger,
    /// Trial currently in flight
    pending: Option<PendingTrial>,
    /// Latest stamp handed out; stamps never go backwards
    last_stamp: Option<DateTime<Local>>,
}

impl Recorder {
    /// Create a recorder appending to `ledger`
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            pending: None,
            last_stamp: None,
        }
    }

    /// Shared handle to the ledger
    pub fn ledger(&self) -> Ledger {
        self.ledger.clone()
    }

    /// Microscope trigger reported for trial `trial_idx` (zero-based)
    pub fn on_trigger(
        &mut self,
        trial_idx: usize,
        odor: u8,
    ) -> Result<DateTime<Local>, RecorderError> {
        if self.pending.is_some() || trial_idx != self.ledger.len() {
            return Err(self.out_of_order(trial_idx, "trigger"));
        }

        let triggered_at = self.stamp();
        self.pending = Some(PendingTrial {
            index: trial_idx,
            odor,
            triggered_at,
            opened_at: None,
        });
        debug!(trial = trial_idx + 1, odor, "trigger recorded");
        Ok(triggered_at)
    }

    /// Valve opened for trial `trial_idx`
    pub fn on_open(&mut self, trial_idx: usize) -> Result<DateTime<Local>, RecorderError> {
        match &self.pending {
            Some(p) if p.index == trial_idx && p.opened_at.is_none() => {}
            _ => return Err(self.out_of_order(trial_idx, "valve open")),
        }

        let opened_at = self.stamp();
        if let Some(pending) = self.pending.as_mut() {
            pending.opened_at = Some(opened_at);
        }
        debug!(trial = trial_idx + 1, "valve open recorded");
        Ok(opened_at)
    }

    /// Valve closed for trial `trial_idx`; appends the finished record
    pub fn on_close(&mut self, trial_idx: usize) -> Result<TrialRecord, RecorderError> {
        let (odor, triggered_at, opened_at) = match &self.pending {
            Some(PendingTrial {
                index,
                odor,
                triggered_at,
                opened_at: Some(opened_at),
            }) if *index == trial_idx => (*odor, *triggered_at, *opened_at),
            _ => return Err(self.out_of_order(trial_idx, "valve close")),
        };

        let record = TrialRecord {
            trial: trial_idx + 1,
            odor,
            triggered_at,
            opened_at,
            closed_at: self.stamp(),
        };
        self.pending = None;
        self.ledger.push(record.clone());
        debug!(trial = record.trial, "trial record appended");
        Ok(record)
    }

    /// Inter-trial delay finished for trial `trial_idx`
    pub fn on_delay_done(&mut self, trial_idx: usize) -> Result<(), RecorderError> {
        if self.pending.is_some() || self.ledger.len() != trial_idx + 1 {
            return Err(self.out_of_order(trial_idx, "delay elapsed"));
        }
        Ok(())
    }

    /// Drop the in-flight trial, if any. Returns its zero-based index.
    pub fn discard_pending(&mut self) -> Option<usize> {
        let pending = self.pending.take()?;
        warn!(
            trial = pending.index + 1,
            odor = pending.odor,
            "discarding incomplete trial"
        );
        Some(pending.index)
    }

    fn stamp(&mut self) -> DateTime<Local> {
        let now = Local::now();
        let stamp = match self.last_stamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn out_of_order(&self, trial_idx: usize, event: &'static str) -> RecorderError {
        let expected = match &self.pending {
            Some(p) if p.opened_at.is_none() => "valve open",
            Some(_) => "valve close",
            None if self.ledger.len() > trial_idx => "delay elapsed",
            None => "trigger",
        };
        RecorderError::OutOfOrder {
            trial: trial_idx + 1,
            event,
            expected,
        }
    }
}
