//! # Odor Delivery Core Library
//!
//! Core functionality for driving the odor-delivery rig.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial link handling for the valve-panel microcontrollers
//! - The wire codec for trial commands and device status codes
//! - The trial ledger (timestamps per trial) and its CSV persistence
//! - The session engine that sequences a whole experiment on a worker thread
//!
//! ## Supported panels
//!
//! - 1% odor panel
//! - 10% odor panel
//!
//! ## Example
//!
//! ```rust,ignore
//! use odor_delivery_core::prelude::*;
//!
//! let params = SessionParams::new(
//!     Panel::OnePercent,
//!     2,
//!     10,
//!     "/data/odor",
//!     SessionMetadata::new("2023-11-16", "mouse7", "roi2"),
//! )?;
//! let trials = TrialSpec::new(vec![1, 2, 1])?;
//!
//! let handle = session::start(params, trials);
//! while !handle.is_finished() {
//!     let progress = handle.progress();
//!     println!("{:>3.0}% {}", progress.fraction * 100.0, progress.status);
//!     std::thread::sleep(std::time::Duration::from_millis(200));
//! }
//! println!("{:?}", handle.outcome());
//! ```

pub mod ledger;
pub mod link;
pub mod protocol;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::ledger::{Ledger, PersistError, Recorder, RecorderError, TrialRecord};
    pub use crate::link::{Link, LinkChannel, LinkConfig, LinkError, SimulatedDevice};
    pub use crate::protocol::{decode_event, encode_command, ProtocolEvent, TrialCommand};
    pub use crate::session::{
        self, CancelToken, ConfigError, Panel, Progress, SessionHandle, SessionMetadata,
        SessionOutcome, SessionParams, SessionState, TrialSpec,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
