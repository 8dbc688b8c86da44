//! Link lifecycle
//!
//! Opens the configured port and turns its byte stream into status lines.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use super::{
    serial::{configure_port, open_port},
    LinkChannel, LinkError, SerialChannel, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, MAX_LINE_LEN,
};
use crate::session::Panel;

/// Link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl LinkConfig {
    /// Configuration for the board driving the given panel
    pub fn for_panel(panel: Panel) -> Self {
        Self {
            port_name: panel.port_name().to_string(),
            ..Self::default()
        }
    }

    /// Read timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// An open (or closed) line-oriented link to a panel board
pub struct Link {
    /// Channel handle; `None` once closed
    channel: Option<Box<dyn LinkChannel>>,
    /// Port name, for logs and status text
    name: String,
    /// Bytes received but not yet returned as a line
    pending: Vec<u8>,
    /// Upper bound for one `read_line` call
    timeout: Duration,
    tx_bytes: u64,
    rx_bytes: u64,
}

impl Link {
    /// Open and configure the serial port described by `config`
    pub fn open(config: &LinkConfig) -> Result<Self, LinkError> {
        let mut port = open_port(&config.port_name, config.baud_rate, config.timeout())?;
        configure_port(port.as_mut())?;

        let mut channel = SerialChannel::new(port);
        channel
            .set_timeout(config.timeout())
            .map_err(|e| LinkError::PortUnavailable {
                port: config.port_name.clone(),
                reason: e.to_string(),
            })?;

        info!(
            port = %config.port_name,
            baud = config.baud_rate,
            timeout_ms = config.timeout_ms,
            "serial link opened"
        );

        Ok(Self::from_channel(config.port_name.clone(), Box::new(channel))
            .with_timeout(config.timeout()))
    }

    /// Wrap an already-open channel
    pub fn from_channel(name: impl Into<String>, channel: Box<dyn LinkChannel>) -> Self {
        Self {
            channel: Some(channel),
            name: name.into(),
            pending: Vec::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Override the per-line read bound
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Port name this link was opened on
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the link is still open
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Cumulative (tx, rx) byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// Read one line from the device.
    ///
    /// Returns `Ok(None)` when nothing arrived within the timeout. A line cut
    /// short by the timeout is returned as-is. Surrounding whitespace
    /// (including the `\r\n` terminator) is stripped.
    pub fn read_line(&mut self) -> Result<Option<String>, LinkError> {
        if let Some(raw) = take_line(&mut self.pending) {
            return decode_line(raw).map(Some);
        }

        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| LinkError::Disconnected(format!("{} is closed", self.name)))?;

        let deadline = Instant::now() + self.timeout;
        let mut buffer = [0u8; 64];

        loop {
            match channel.read(&mut buffer) {
                Ok(0) => {
                    return Err(LinkError::Disconnected(format!(
                        "{} reported end of stream",
                        self.name
                    )));
                }
                Ok(n) => {
                    self.rx_bytes = self.rx_bytes.saturating_add(n as u64);
                    self.pending.extend_from_slice(&buffer[..n]);
                    trace!(port = %self.name, "read {} bytes: {:02x?}", n, &buffer[..n]);

                    if let Some(raw) = take_line(&mut self.pending) {
                        return decode_line(raw).map(Some);
                    }
                    if self.pending.len() >= MAX_LINE_LEN || Instant::now() >= deadline {
                        return take_partial(&mut self.pending);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(ref e)
                    if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock =>
                {
                    return take_partial(&mut self.pending);
                }
                Err(e) => {
                    return Err(LinkError::Disconnected(format!("{}: {}", self.name, e)));
                }
            }
        }
    }

    /// Write a command and flush it to the device
    pub fn write(&mut self, command: &str) -> Result<(), LinkError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| LinkError::Disconnected(format!("{} is closed", self.name)))?;

        channel
            .write_all(command.as_bytes())
            .and_then(|_| channel.flush())
            .map_err(|e| LinkError::Disconnected(format!("{}: {}", self.name, e)))?;

        self.tx_bytes = self.tx_bytes.saturating_add(command.len() as u64);
        debug!(port = %self.name, command, "command written");
        Ok(())
    }

    /// Close the link. Safe to call more than once.
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            self.pending.clear();
            info!(
                port = %self.name,
                tx_bytes = self.tx_bytes,
                rx_bytes = self.rx_bytes,
                "serial link closed"
            );
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Split the first `\n`-terminated line off the front of `pending`
fn take_line(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = pending.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=end).collect();
    line.pop();
    Some(line)
}

/// Whatever arrived before the timeout, or `None` if nothing did
fn take_partial(pending: &mut Vec<u8>) -> Result<Option<String>, LinkError> {
    if pending.is_empty() {
        return Ok(None);
    }
    // A multi-byte character cut off by the timeout stays buffered for the next read
    let complete = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => return decode_line(std::mem::take(pending)).map(Some),
    };
    if complete == 0 {
        return Ok(None);
    }
    let tail = pending.split_off(complete);
    let head = std::mem::replace(pending, tail);
    decode_line(head).map(Some)
}

fn decode_line(raw: Vec<u8>) -> Result<String, LinkError> {
    match String::from_utf8(raw) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) => Err(LinkError::Malformed(e.into_bytes())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Channel that replays canned read results
    struct Replay {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
    }

    impl Replay {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
                written: Vec::new(),
            }
        }
    }

    impl Read for Replay {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(ErrorKind::TimedOut, "quiet")),
            }
        }
    }

    impl Write for Replay {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LinkChannel for Replay {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    fn link(reads: Vec<io::Result<Vec<u8>>>) -> Link {
        Link::from_channel("replay", Box::new(Replay::new(reads)))
    }

    #[test]
    fn test_link_config_default() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_read_line_strips_terminator() {
        let mut link = link(vec![Ok(b"9\r\n".to_vec())]);
        assert_eq!(link.read_line().unwrap(), Some("9".to_string()));
        assert_eq!(link.counters(), (0, 3));
    }

    #[test]
    fn test_read_line_splits_burst() {
        let mut link = link(vec![Ok(b"y\r\ny\r\n9\r".to_vec()), Ok(b"\n".to_vec())]);
        assert_eq!(link.read_line().unwrap(), Some("y".to_string()));
        assert_eq!(link.read_line().unwrap(), Some("y".to_string()));
        assert_eq!(link.read_line().unwrap(), Some("9".to_string()));
    }

    #[test]
    fn test_read_line_timeout_is_none() {
        let mut link = link(vec![]);
        assert_eq!(link.read_line().unwrap(), None);
    }

    #[test]
    fn test_read_line_returns_partial_on_timeout() {
        let mut link = link(vec![Ok(b"yy".to_vec())]);
        assert_eq!(link.read_line().unwrap(), Some("yy".to_string()));
        assert_eq!(link.read_line().unwrap(), None);
    }

    #[test]
    fn test_read_line_malformed_bytes() {
        let mut link = link(vec![Ok(vec![0xff, 0xfe, b'\n'])]);
        assert_eq!(
            link.read_line().unwrap_err(),
            LinkError::Malformed(vec![0xff, 0xfe])
        );
    }

    #[test]
    fn test_partial_line_keeps_split_character() {
        let mut link = link(vec![
            Ok(b"y\xc3".to_vec()),
            Err(io::Error::new(ErrorKind::TimedOut, "quiet")),
            Ok(b"\xa9\n".to_vec()),
        ]);
        assert_eq!(link.read_line().unwrap(), Some("y".to_string()));
        assert_eq!(link.read_line().unwrap(), Some("\u{e9}".to_string()));
    }

    #[test]
    fn test_partial_line_invalid_bytes_still_malformed() {
        let mut link = link(vec![Ok(vec![b'y', 0xff])]);
        assert_eq!(
            link.read_line().unwrap_err(),
            LinkError::Malformed(vec![b'y', 0xff])
        );
    }

    #[test]
    fn test_read_line_eof_is_disconnect() {
        let mut link = link(vec![Ok(Vec::new())]);
        assert!(matches!(
            link.read_line().unwrap_err(),
            LinkError::Disconnected(_)
        ));
    }

    #[test]
    fn test_read_line_io_error_is_disconnect() {
        let mut link = link(vec![Err(io::Error::new(
            ErrorKind::BrokenPipe,
            "unplugged",
        ))]);
        assert!(matches!(
            link.read_line().unwrap_err(),
            LinkError::Disconnected(_)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut link = link(vec![]);
        link.write("<1,2,3>").unwrap();
        assert_eq!(link.counters(), (7, 0));
        link.close();
        link.close();
        assert!(!link.is_open());
        assert!(matches!(
            link.write("<1,2,3>").unwrap_err(),
            LinkError::Disconnected(_)
        ));
        assert!(matches!(
            link.read_line().unwrap_err(),
            LinkError::Disconnected(_)
        ));
    }
}
