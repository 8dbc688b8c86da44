//! Link errors

use thiserror::Error;

/// Errors that can occur on the serial link.
///
/// Every variant is fatal to a running session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("Link disconnected: {0}")]
    Disconnected(String),

    #[error("Malformed bytes from device: {0:02x?}")]
    Malformed(Vec<u8>),
}
