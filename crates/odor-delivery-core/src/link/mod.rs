//! Serial Link
//!
//! Owns the byte channel to a valve-panel microcontroller: opening and
//! configuring the port, line-oriented reads with a bounded timeout, and
//! command writes.
//!
//! All access to a [`Link`] happens on the session worker thread; the type is
//! `Send` but deliberately not shared.

mod channel;
mod connection;
mod error;
pub mod serial;
mod simulator;

pub use channel::{LinkChannel, SerialChannel};
pub use connection::{Link, LinkConfig};
pub use error::LinkError;
pub use serial::{configure_port, list_ports, open_port, PortInfo};
pub use simulator::{SimulatedDevice, SimulatorConfig};

/// Baud rate the panel firmware listens at
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Read timeout for a single line, in milliseconds.
/// The device is silent for the whole odor duration and inter-trial delay,
/// so a timeout is routine and never an error.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Longest run of bytes without a newline accepted as one line
pub const MAX_LINE_LEN: usize = 256;
