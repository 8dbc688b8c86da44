//! Session state machine
//!
//! Drives one experiment over an open link: waits for the board's ready
//! handshake, then sends one command per trial and follows the board's
//! status codes until the trial's delay has elapsed.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use super::progress::{ProgressReporter, TrialStep};
use super::{CancelToken, SessionError, SessionParams, TrialSpec};
use crate::ledger::{Recorder, SessionFiles};
use crate::link::{Link, LinkError};
use crate::protocol::{decode_event, ProtocolEvent, TrialCommand};

/// Where the session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Opening the serial port
    Opening,
    /// Waiting for the board's ready marker
    AwaitingHandshake,
    /// Command sent, waiting for the microscope trigger
    AwaitingTrigger {
        /// Zero-based trial index
        trial: usize,
    },
    /// Waiting for the valve to open
    AwaitingOpen {
        /// Zero-based trial index
        trial: usize,
    },
    /// Odor flowing, waiting for the valve to close
    AwaitingClose {
        /// Zero-based trial index
        trial: usize,
    },
    /// Valve closed, waiting for the inter-trial delay to elapse
    AwaitingDelayDone {
        /// Zero-based trial index
        trial: usize,
    },
    /// Every trial finished
    Completed,
    /// Cancelled by the caller
    Aborted,
    /// Ended by a fatal link or protocol error
    LinkLost,
}

impl SessionState {
    /// Whether the session has ended
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::LinkLost
        )
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// All trials were delivered
    Completed,
    /// The caller cancelled
    Aborted,
    /// A fatal error ended the session
    LinkLost(String),
}

/// Whether the sequence may continue after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Cancelled,
}

/// One session's worker-side state
pub(crate) struct SessionMachine {
    params: SessionParams,
    trials: TrialSpec,
    recorder: Recorder,
    files: SessionFiles,
    reporter: ProgressReporter,
    cancel: CancelToken,
    commands_sent: Arc<AtomicUsize>,
    state: SessionState,
}

impl SessionMachine {
    pub(crate) fn new(
        params: SessionParams,
        trials: TrialSpec,
        recorder: Recorder,
        files: SessionFiles,
        reporter: ProgressReporter,
        cancel: CancelToken,
        commands_sent: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            params,
            trials,
            recorder,
            files,
            reporter,
            cancel,
            commands_sent,
            state: SessionState::Opening,
        }
    }

    /// Run the whole session. The link is closed before this returns.
    pub(crate) fn run<F>(mut self, open: F) -> SessionOutcome
    where
        F: FnOnce() -> Result<Link, LinkError>,
    {
        if let Err(e) = self.files.write_order(&self.trials) {
            self.reporter.warning(format!("Trial order not saved: {}", e));
        }

        let mut link = match open() {
            Ok(link) => link,
            Err(e) => return self.finish(None, Err(e.into())),
        };
        self.reporter.port_opened(link.name());

        let result = self.drive(&mut link);
        self.finish(Some(link), result)
    }

    fn transition(&mut self, state: SessionState) {
        trace!(from = ?self.state, to = ?state, "session transition");
        self.state = state;
        self.reporter.set_state(state);
    }

    fn drive(&mut self, link: &mut Link) -> Result<SessionOutcome, SessionError> {
        if self.await_handshake(link)? == Flow::Cancelled {
            return Ok(SessionOutcome::Aborted);
        }

        for trial_idx in 0..self.trials.len() {
            if self.cancel.is_cancelled() {
                return Ok(SessionOutcome::Aborted);
            }
            if self.run_trial(link, trial_idx)? == Flow::Cancelled {
                return Ok(SessionOutcome::Aborted);
            }
        }
        Ok(SessionOutcome::Completed)
    }

    fn await_handshake(&mut self, link: &mut Link) -> Result<Flow, SessionError> {
        self.transition(SessionState::AwaitingHandshake);
        self.reporter.awaiting_handshake();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            match decode_event(link.read_line()?.as_deref()) {
                ProtocolEvent::Handshake => {
                    debug!(port = link.name(), "handshake received");
                    self.reporter.handshake_received();
                    return Ok(Flow::Continue);
                }
                ProtocolEvent::LinkTimeout => {}
                other => trace!(event = ?other, "discarding pre-session output"),
            }
        }
    }

    fn run_trial(&mut self, link: &mut Link, trial_idx: usize) -> Result<Flow, SessionError> {
        let Some(odor) = self.trials.get(trial_idx) else {
            return Ok(Flow::Continue);
        };

        self.reporter.trial_started(trial_idx);
        let command = TrialCommand::new(odor, self.params.odor_duration_s(), self.params.delay_s());
        link.write(&command.to_string())?;
        self.commands_sent.fetch_add(1, Ordering::AcqRel);
        self.transition(SessionState::AwaitingTrigger { trial: trial_idx });

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            let line = link.read_line()?;
            if self.cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }

            match decode_event(line.as_deref()) {
                ProtocolEvent::TriggerSent => {
                    let at = self.recorder.on_trigger(trial_idx, odor)?;
                    self.transition(SessionState::AwaitingOpen { trial: trial_idx });
                    self.reporter
                        .step(trial_idx, odor, TrialStep::Triggered, Some(at));
                }
                ProtocolEvent::ValveOpened => {
                    let at = self.recorder.on_open(trial_idx)?;
                    self.transition(SessionState::AwaitingClose { trial: trial_idx });
                    self.reporter
                        .step(trial_idx, odor, TrialStep::Released, Some(at));
                }
                ProtocolEvent::ValveClosed => {
                    let record = self.recorder.on_close(trial_idx)?;
                    self.transition(SessionState::AwaitingDelayDone { trial: trial_idx });
                    self.persist_timings();
                    self.reporter
                        .step(trial_idx, odor, TrialStep::Stopped, Some(record.closed_at));
                }
                ProtocolEvent::DelayElapsed => {
                    self.recorder.on_delay_done(trial_idx)?;
                    self.reporter
                        .step(trial_idx, odor, TrialStep::DelayFinished, None);
                    return Ok(Flow::Continue);
                }
                // Mid-trial handshakes are chatter; unknown lines are ignored.
                // No retry ceiling on silence: the operator can always cancel.
                ProtocolEvent::Handshake
                | ProtocolEvent::Unrecognized(_)
                | ProtocolEvent::LinkTimeout => {
                    trace!(trial = trial_idx + 1, line = ?line, "no-op device output");
                }
            }
        }
    }

    fn persist_timings(&self) {
        let records = self.recorder.ledger().snapshot();
        if let Err(e) = self.files.write_timings(&records) {
            self.reporter
                .warning(format!("Timings not saved after trial {}: {}", records.len(), e));
        }
    }

    fn finish(
        &mut self,
        link: Option<Link>,
        result: Result<SessionOutcome, SessionError>,
    ) -> SessionOutcome {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(state = ?self.state, "session failed: {}", e);
                SessionOutcome::LinkLost(e.to_string())
            }
        };

        self.recorder.discard_pending();
        if let Some(mut link) = link {
            link.close();
        }

        let terminal = match outcome {
            SessionOutcome::Completed => SessionState::Completed,
            SessionOutcome::Aborted => SessionState::Aborted,
            SessionOutcome::LinkLost(_) => SessionState::LinkLost,
        };
        self.transition(terminal);
        self.reporter
            .finished(&outcome, self.recorder.ledger().len());
        outcome
    }
}
