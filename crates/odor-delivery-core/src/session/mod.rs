//! Session Engine
//!
//! Runs one odor-delivery experiment on a dedicated worker thread.
//!
//! The caller resolves [`SessionParams`] and a [`TrialSpec`], calls [`start`]
//! (or [`start_with_link`] for a non-serial link), and then only polls the
//! returned [`SessionHandle`]: progress, the ledger snapshot, the outcome.
//! The link is owned by the worker for the whole session and the caller's
//! thread never blocks on it.

mod cancel;
mod error;
mod machine;
mod params;
mod progress;

pub use cancel::CancelToken;
pub use error::{ConfigError, SessionError};
pub use machine::{SessionOutcome, SessionState};
pub use params::{Panel, SessionMetadata, SessionParams, TrialSpec};
pub use progress::Progress;

use chrono::Local;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use tracing::{error, info};

use crate::ledger::{Ledger, Recorder, SessionFiles, TrialRecord};
use crate::link::{Link, LinkConfig, LinkError};
use machine::SessionMachine;
use progress::ProgressReporter;

/// Start a session on the serial port wired to `params.panel()`
pub fn start(params: SessionParams, trials: TrialSpec) -> SessionHandle {
    let config = LinkConfig::for_panel(params.panel());
    start_with_link(params, trials, move || Link::open(&config))
}

/// Start a session whose link is produced by `open` on the worker thread
pub fn start_with_link<F>(params: SessionParams, trials: TrialSpec, open: F) -> SessionHandle
where
    F: FnOnce() -> Result<Link, LinkError> + Send + 'static,
{
    let session_start = Local::now();
    let files = SessionFiles::new(
        params.output_dir(),
        params.panel(),
        params.metadata(),
        &session_start,
    );
    let ledger = Ledger::new();
    let reporter = ProgressReporter::new(trials.len());
    let cancel = CancelToken::new();
    let commands_sent = Arc::new(AtomicUsize::new(0));
    let outcome: Arc<OnceLock<SessionOutcome>> = Arc::new(OnceLock::new());

    info!(
        panel = %params.panel(),
        trials = trials.len(),
        odor_duration_s = params.odor_duration_s(),
        delay_s = params.delay_s(),
        "starting odor delivery session"
    );

    let machine = SessionMachine::new(
        params,
        trials,
        Recorder::new(ledger.clone()),
        files.clone(),
        reporter.clone(),
        cancel.clone(),
        Arc::clone(&commands_sent),
    );

    let slot = Arc::clone(&outcome);
    let panic_reporter = reporter.clone();
    let spawned = std::thread::Builder::new()
        .name("odor-session".to_string())
        .spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                machine.run(open)
            }));
            let outcome = result.unwrap_or_else(|panic_info| {
                let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                let outcome =
                    SessionOutcome::LinkLost(format!("session worker panicked: {}", message));
                panic_reporter.finished(&outcome, 0);
                outcome
            });
            let _ = slot.set(outcome);
        });

    let worker = match spawned {
        Ok(worker) => Some(worker),
        Err(e) => {
            error!("failed to spawn session worker: {}", e);
            let failed =
                SessionOutcome::LinkLost(format!("failed to spawn session worker: {}", e));
            reporter.finished(&failed, 0);
            let _ = outcome.set(failed);
            None
        }
    };

    SessionHandle {
        cancel,
        reporter,
        ledger,
        files,
        commands_sent,
        outcome,
        worker,
    }
}

/// Caller-side view of a running (or finished) session.
///
/// Dropping the handle requests cancellation; the worker then stops at its
/// next poll point and closes the link.
pub struct SessionHandle {
    cancel: CancelToken,
    reporter: ProgressReporter,
    ledger: Ledger,
    files: SessionFiles,
    commands_sent: Arc<AtomicUsize>,
    outcome: Arc<OnceLock<SessionOutcome>>,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Ask the session to stop. The in-flight trial is not recorded.
    pub fn request_cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("session cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Token that cancels this session, for handing to other threads
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current progress fraction, status text and state
    pub fn progress(&self) -> Progress {
        self.reporter.snapshot()
    }

    /// Terminal outcome, or `None` while the session is running
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.get().cloned()
    }

    /// Whether the session has ended
    pub fn is_finished(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// Completed trials so far
    pub fn records(&self) -> Vec<TrialRecord> {
        self.ledger.snapshot()
    }

    /// Shared ledger, for observers that outlive the handle
    pub fn ledger(&self) -> Ledger {
        self.ledger.clone()
    }

    /// Timestamped output log
    pub fn log_lines(&self) -> Vec<String> {
        self.reporter.log_lines()
    }

    /// Persistence warnings raised so far
    pub fn warnings(&self) -> Vec<String> {
        self.reporter.warnings()
    }

    /// Number of trial commands written to the device
    pub fn commands_sent(&self) -> usize {
        self.commands_sent.load(Ordering::Acquire)
    }

    /// Where the order and timings files are written
    pub fn output_files(&self) -> &SessionFiles {
        &self.files
    }

    /// Block until the session ends and return its outcome
    pub fn wait(mut self) -> SessionOutcome {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("session worker terminated abnormally");
            }
        }
        self.outcome
            .get()
            .cloned()
            .unwrap_or_else(|| SessionOutcome::LinkLost("session worker vanished".to_string()))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.worker.is_some() && !self.is_finished() {
            self.request_cancel();
        }
    }
}
