//! Command encoding and status decoding
//!
//! Pure translation: no I/O and no state.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{
    CODE_DELAY_ELAPSED, CODE_TRIGGER_SENT, CODE_VALVE_CLOSED, CODE_VALVE_OPENED,
    HANDSHAKE_MARKER,
};

/// One trial's activation command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialCommand {
    /// Valve (odor) to open
    pub odor: u8,
    /// How long the valve stays open, in seconds
    pub duration_s: u32,
    /// Pause after closing, in seconds
    pub delay_s: u32,
}

impl TrialCommand {
    /// Create a new command
    pub fn new(odor: u8, duration_s: u32, delay_s: u32) -> Self {
        Self {
            odor,
            duration_s,
            delay_s,
        }
    }
}

/// Formats the exact wire frame the firmware parses
impl fmt::Display for TrialCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{},{},{}>", self.odor, self.duration_s, self.delay_s)
    }
}

/// Encode a trial command as `<odor,duration,delay>`
pub fn encode_command(odor: u8, duration_s: u32, delay_s: u32) -> String {
    TrialCommand::new(odor, duration_s, delay_s).to_string()
}

/// A decoded line of device output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    /// Device is ready (or just chattering)
    Handshake,
    /// Microscope trigger pulse sent
    TriggerSent,
    /// Odor valve opened
    ValveOpened,
    /// Odor valve closed
    ValveClosed,
    /// Inter-trial delay finished
    DelayElapsed,
    /// Anything else; ignored by the session
    Unrecognized(String),
    /// Nothing arrived before the read timeout
    LinkTimeout,
}

/// Classify one line of device output
pub fn decode_event(line: Option<&str>) -> ProtocolEvent {
    let Some(line) = line.map(str::trim) else {
        return ProtocolEvent::LinkTimeout;
    };

    match line {
        "" => ProtocolEvent::LinkTimeout,
        CODE_TRIGGER_SENT => ProtocolEvent::TriggerSent,
        CODE_VALVE_OPENED => ProtocolEvent::ValveOpened,
        CODE_VALVE_CLOSED => ProtocolEvent::ValveClosed,
        CODE_DELAY_ELAPSED => ProtocolEvent::DelayElapsed,
        // The board may repeat its ready marker several times in one burst
        text if text.contains(HANDSHAKE_MARKER) => ProtocolEvent::Handshake,
        text => ProtocolEvent::Unrecognized(text.to_string()),
    }
}
