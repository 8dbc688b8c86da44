//! Progress reporting
//!
//! Turns state-machine transitions into the status text, progress fraction
//! and timestamped output log the operator UI displays.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use super::{SessionOutcome, SessionState};

/// Point-in-time view of a session's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Completed share of the trial list, 0.0 to 1.0
    pub fraction: f64,
    /// Latest status line
    pub status: String,
    /// Current state-machine state
    pub state: SessionState,
}

/// Within-trial milestones reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrialStep {
    Triggered,
    Released,
    Stopped,
    DelayFinished,
}

impl TrialStep {
    fn log_text(&self) -> &'static str {
        match self {
            TrialStep::Triggered => "microscope triggered",
            TrialStep::Released => "odor released",
            TrialStep::Stopped => "stopped, delay started",
            TrialStep::DelayFinished => "delay finished, send next solenoid info.",
        }
    }
}

#[derive(Debug)]
struct ProgressState {
    progress: Progress,
    log: Vec<String>,
    warnings: Vec<String>,
}

/// Shared progress sink: written by the worker, read by the caller
#[derive(Debug, Clone)]
pub(crate) struct ProgressReporter {
    inner: Arc<Mutex<ProgressState>>,
    total: usize,
}

impl ProgressReporter {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressState {
                progress: Progress {
                    fraction: 0.0,
                    status: "Starting session".to_string(),
                    state: SessionState::Opening,
                },
                log: Vec::new(),
                warnings: Vec::new(),
            })),
            total,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn snapshot(&self) -> Progress {
        self.lock().progress.clone()
    }

    pub(crate) fn log_lines(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub(crate) fn warnings(&self) -> Vec<String> {
        self.lock().warnings.clone()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.lock().progress.state = state;
    }

    fn set_status(&self, status: String) {
        info!("{}", status);
        self.lock().progress.status = status;
    }

    pub(crate) fn port_opened(&self, port: &str) {
        self.set_status(format!("Port {} opened.", port));
    }

    pub(crate) fn awaiting_handshake(&self) {
        self.set_state(SessionState::AwaitingHandshake);
        self.set_status(
            "Press Start/Run on the imaging software to start odor delivery".to_string(),
        );
    }

    pub(crate) fn handshake_received(&self) {
        self.set_status("Panel board ready".to_string());
    }

    pub(crate) fn trial_started(&self, trial_idx: usize) {
        let status = format!("Executing Trial {}/{}", trial_idx + 1, self.total);
        info!("{}", status);
        let mut guard = self.lock();
        guard.progress.fraction = trial_idx as f64 / self.total.max(1) as f64;
        guard.progress.status = status;
    }

    pub(crate) fn step(
        &self,
        trial_idx: usize,
        odor: u8,
        step: TrialStep,
        at: Option<DateTime<Local>>,
    ) {
        let trial = trial_idx + 1;
        let clock = at.unwrap_or_else(Local::now);
        let status = match step {
            TrialStep::Triggered => format!(
                "Trial {}, Odor {} microscope triggered at {}",
                trial,
                odor,
                clock.format("%H:%M:%S%.3f")
            ),
            TrialStep::Released => format!(
                "Trial {}, Odor {} released at {}",
                trial,
                odor,
                clock.format("%H:%M:%S%.3f")
            ),
            TrialStep::Stopped => format!(
                "Trial {}, Odor {} stopped. Delay started at {}",
                trial,
                odor,
                clock.format("%H:%M:%S%.3f")
            ),
            TrialStep::DelayFinished => format!(
                "Trial {}, Odor {} delay finished, send next solenoid info",
                trial, odor
            ),
        };
        let line = format!(
            "{}: Trial {}, Odor {} {}",
            clock.format("%H:%M:%S"),
            trial,
            odor,
            step.log_text()
        );

        info!("{}", status);
        let mut guard = self.lock();
        guard.progress.status = status;
        guard.log.push(line);
    }

    pub(crate) fn warning(&self, message: String) {
        warn!("{}", message);
        let mut guard = self.lock();
        guard.log.push(format!("{}: {}", Local::now().format("%H:%M:%S"), message));
        guard.warnings.push(message);
    }

    pub(crate) fn finished(&self, outcome: &SessionOutcome, completed: usize) {
        let (state, status) = match outcome {
            SessionOutcome::Completed => (
                SessionState::Completed,
                "Odor delivery sequence complete.".to_string(),
            ),
            SessionOutcome::Aborted => (
                SessionState::Aborted,
                format!(
                    "Experiment aborted after {} of {} trials. \
                     Start a new session to redo the sequence.",
                    completed, self.total
                ),
            ),
            SessionOutcome::LinkLost(reason) => {
                (SessionState::LinkLost, format!("Connection lost: {}", reason))
            }
        };

        info!("{}", status);
        let mut guard = self.lock();
        if state == SessionState::Completed {
            guard.progress.fraction = 1.0;
        }
        guard.progress.state = state;
        guard.progress.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fraction_tracks_trials() {
        let reporter = ProgressReporter::new(4);
        reporter.trial_started(0);
        assert_eq!(reporter.snapshot().fraction, 0.0);
        reporter.trial_started(2);
        let progress = reporter.snapshot();
        assert_eq!(progress.fraction, 0.5);
        assert_eq!(progress.status, "Executing Trial 3/4");

        reporter.finished(&SessionOutcome::Completed, 4);
        let progress = reporter.snapshot();
        assert_eq!(progress.fraction, 1.0);
        assert_eq!(progress.state, SessionState::Completed);
    }

    #[test]
    fn test_step_text_and_log() {
        let reporter = ProgressReporter::new(2);
        let at = Local.with_ymd_and_hms(2023, 11, 16, 9, 30, 5).unwrap();
        reporter.step(0, 3, TrialStep::Triggered, Some(at));
        reporter.step(0, 3, TrialStep::Stopped, Some(at));

        assert_eq!(
            reporter.snapshot().status,
            "Trial 1, Odor 3 stopped. Delay started at 09:30:05.000"
        );
        assert_eq!(
            reporter.log_lines(),
            vec![
                "09:30:05: Trial 1, Odor 3 microscope triggered".to_string(),
                "09:30:05: Trial 1, Odor 3 stopped, delay started".to_string(),
            ]
        );
    }

    #[test]
    fn test_abort_keeps_fraction() {
        let reporter = ProgressReporter::new(4);
        reporter.trial_started(1);
        reporter.finished(&SessionOutcome::Aborted, 1);
        let progress = reporter.snapshot();
        assert_eq!(progress.fraction, 0.25);
        assert_eq!(progress.state, SessionState::Aborted);
        assert!(progress.status.starts_with("Experiment aborted after 1 of 4"));
    }

    #[test]
    fn test_warnings_are_collected() {
        let reporter = ProgressReporter::new(1);
        reporter.warning("disk full".to_string());
        assert_eq!(reporter.warnings(), vec!["disk full".to_string()]);
        assert_eq!(reporter.log_lines().len(), 1);
    }
}
