use odor_delivery_core::link::{Link, LinkChannel, LinkError};
use odor_delivery_core::protocol::{decode_event, encode_command, ProtocolEvent};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock serial port for testing
struct MockSerial {
    send_buffer: Arc<Mutex<Vec<u8>>>,
    recv_buffer: Vec<u8>,
    recv_idx: usize,
    chunk: usize,
    fail_on_send: bool,
}

impl MockSerial {
    fn with_response(response: &[u8]) -> Self {
        Self {
            send_buffer: Arc::new(Mutex::new(Vec::new())),
            recv_buffer: response.to_vec(),
            recv_idx: 0,
            chunk: usize::MAX,
            fail_on_send: false,
        }
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.recv_buffer[self.recv_idx..];
        if remaining.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = remaining.len().min(buf.len()).min(self.chunk);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.recv_idx += n;
        Ok(n)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_on_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Serial write failed"));
        }
        self.send_buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LinkChannel for MockSerial {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

fn link(mock: MockSerial) -> Link {
    Link::from_channel("mock", Box::new(mock)).with_timeout(Duration::from_millis(50))
}

#[test]
fn test_full_trial_decodes_over_link() {
    let mut link = link(MockSerial::with_response(b"y\r\n9\r\n1\r\n2\r\n3\r\n"));
    let mut events = Vec::new();
    loop {
        let event = decode_event(link.read_line().unwrap().as_deref());
        if event == ProtocolEvent::LinkTimeout {
            break;
        }
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            ProtocolEvent::Handshake,
            ProtocolEvent::TriggerSent,
            ProtocolEvent::ValveOpened,
            ProtocolEvent::ValveClosed,
            ProtocolEvent::DelayElapsed,
        ]
    );
}

#[test]
fn test_bytes_trickling_in_form_one_line() {
    let mut mock = MockSerial::with_response(b"yyy\r\n");
    mock.chunk = 1;
    let mut link = link(mock);
    assert_eq!(link.read_line().unwrap().as_deref(), Some("yyy"));
    assert_eq!(decode_event(Some("yyy")), ProtocolEvent::Handshake);
}

#[test]
fn test_command_reaches_the_wire() {
    let mock = MockSerial::with_response(b"");
    let sent = Arc::clone(&mock.send_buffer);
    let mut link = link(mock);

    link.write(&encode_command(7, 2, 15)).unwrap();
    assert_eq!(*sent.lock().unwrap(), b"<7,2,15>".to_vec());
    assert_eq!(link.counters(), (8, 0));
}

#[test]
fn test_write_failure_is_disconnect() {
    let mut mock = MockSerial::with_response(b"");
    mock.fail_on_send = true;
    let mut link = link(mock);

    let err = link.write("<1,1,1>").unwrap_err();
    assert!(matches!(err, LinkError::Disconnected(_)));
}

#[test]
fn test_silence_is_not_an_error() {
    let mut link = link(MockSerial::with_response(b""));
    assert_eq!(link.read_line().unwrap(), None);
    assert_eq!(decode_event(None), ProtocolEvent::LinkTimeout);
}

#[test]
fn test_closed_link_refuses_io() {
    let mut link = link(MockSerial::with_response(b"9\r\n"));
    link.close();
    link.close();
    assert!(!link.is_open());
    assert!(matches!(link.read_line(), Err(LinkError::Disconnected(_))));
    assert!(matches!(link.write("<1,1,1>"), Err(LinkError::Disconnected(_))));
}

#[test]
fn test_link_error_display() {
    let err = LinkError::PortUnavailable {
        port: "COM8".to_string(),
        reason: "Access is denied".to_string(),
    };
    assert_eq!(err.to_string(), "Port COM8 unavailable: Access is denied");
}
