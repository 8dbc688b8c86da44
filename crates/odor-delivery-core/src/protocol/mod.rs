//! Wire Protocol
//!
//! The host sends one framed command per trial; the panel firmware answers
//! with single-character status lines.
//!
//! | Device line | Meaning |
//! |---|---|
//! | `9` | microscope trigger sent |
//! | `1` | valve opened |
//! | `2` | valve closed, inter-trial delay started |
//! | `3` | delay elapsed, ready for the next command |
//! | contains `y` | ready / keep-alive |

mod codec;

pub use codec::{decode_event, encode_command, ProtocolEvent, TrialCommand};

/// Status code: microscope trigger sent
pub const CODE_TRIGGER_SENT: &str = "9";

/// Status code: valve opened
pub const CODE_VALVE_OPENED: &str = "1";

/// Status code: valve closed
pub const CODE_VALVE_CLOSED: &str = "2";

/// Status code: inter-trial delay elapsed
pub const CODE_DELAY_ELAPSED: &str = "3";

/// Any line containing this character is a handshake
pub const HANDSHAKE_MARKER: char = 'y';
