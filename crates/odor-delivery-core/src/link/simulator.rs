//! Simulated panel board
//!
//! Behaves like the valve-panel firmware on the other end of the wire so a
//! session can be dry-run without hardware: announces readiness, accepts
//! `<odor,duration,delay>` frames and answers with the trigger, open, close
//! and delay-done codes on a (scalable) real-time schedule.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{LinkChannel, DEFAULT_TIMEOUT_MS};

/// Lines the simulator may emit between real status codes
const CHATTER: [&str; 3] = ["y", "x", "ready?"];

/// Simulator tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Multiplier applied to odor duration and delay (0.0 = instantaneous)
    pub time_scale: f64,
    /// Chance that a stray line is emitted before each status code
    pub chatter_probability: f64,
    /// How many handshake lines to emit before the first command
    pub handshake_repeats: u32,
    /// Seed for the chatter generator
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            chatter_probability: 0.0,
            handshake_repeats: 1,
            seed: 0,
        }
    }
}

/// Simulated board implementing [`LinkChannel`]
pub struct SimulatedDevice {
    config: SimulatorConfig,
    /// Scheduled lines, in emission order
    outbox: VecDeque<(Instant, String)>,
    /// Bytes of the line currently being delivered
    cursor: Vec<u8>,
    /// Partially received command frame
    inbox: Vec<u8>,
    /// Every complete frame received, shared with the creator
    commands: Arc<Mutex<Vec<String>>>,
    timeout: Duration,
    rng: StdRng,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SimulatedDevice {
    /// Create a simulator that is ready to announce its handshake
    pub fn new(config: SimulatorConfig) -> Self {
        let now = Instant::now();
        let outbox = (0..config.handshake_repeats.max(1))
            .map(|_| (now, "y".to_string()))
            .collect();
        let rng = StdRng::seed_from_u64(config.seed);

        Self {
            config,
            outbox,
            cursor: Vec::new(),
            inbox: Vec::new(),
            commands: Arc::new(Mutex::new(Vec::new())),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            rng,
        }
    }

    /// Shared log of the command frames received so far
    pub fn command_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.commands)
    }

    fn scaled(&self, seconds: u32) -> Duration {
        Duration::from_secs_f64(f64::from(seconds) * self.config.time_scale.max(0.0))
    }

    /// Pull every complete `<...>` frame out of the inbox and schedule its replies
    fn accept_frames(&mut self) {
        while let Some(start) = self.inbox.iter().position(|&b| b == b'<') {
            let Some(len) = self.inbox[start..].iter().position(|&b| b == b'>') else {
                break;
            };
            let frame: Vec<u8> = self.inbox.drain(..=start + len).skip(start).collect();
            let frame = String::from_utf8_lossy(&frame).into_owned();

            match parse_frame(&frame) {
                Some((odor, duration, delay)) => {
                    debug!(frame = %frame, odor, "simulator accepted command");
                    self.schedule_trial(duration, delay);
                }
                None => warn!(frame = %frame, "simulator ignored unparseable command"),
            }
            self.commands
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(frame);
        }
    }

    fn schedule_trial(&mut self, duration: u32, delay: u32) {
        let start = self
            .outbox
            .back()
            .map(|(at, _)| *at)
            .unwrap_or_else(Instant::now)
            .max(Instant::now());
        let closed = start + self.scaled(duration);
        let done = closed + self.scaled(delay);

        self.outbox.push_back((start, "9".to_string()));
        self.outbox.push_back((start, "1".to_string()));
        self.outbox.push_back((closed, "2".to_string()));
        self.outbox.push_back((done, "3".to_string()));
    }

    /// Move the next due line into the cursor, waiting at most one timeout
    fn next_line(&mut self) -> io::Result<()> {
        let Some(&(due, _)) = self.outbox.front() else {
            std::thread::sleep(self.timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "device idle"));
        };

        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > self.timeout {
                std::thread::sleep(self.timeout);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "device busy"));
            }
            std::thread::sleep(wait);
        }

        if self.config.chatter_probability > 0.0
            && self.rng.gen_bool(self.config.chatter_probability.min(1.0))
        {
            let stray = CHATTER[self.rng.gen_range(0..CHATTER.len())];
            self.cursor.extend_from_slice(stray.as_bytes());
            self.cursor.extend_from_slice(b"\r\n");
        }

        if let Some((_, line)) = self.outbox.pop_front() {
            self.cursor.extend_from_slice(line.as_bytes());
            self.cursor.extend_from_slice(b"\r\n");
        }
        Ok(())
    }
}

/// Parse `<odor,duration,delay>` into its three integers
fn parse_frame(frame: &str) -> Option<(u8, u32, u32)> {
    let body = frame.strip_prefix('<')?.strip_suffix('>')?;
    let mut fields = body.split(',').map(str::trim);
    let odor = fields.next()?.parse().ok()?;
    let duration = fields.next()?.parse().ok()?;
    let delay = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((odor, duration, delay))
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor.is_empty() {
            self.next_line()?;
        }
        let n = buf.len().min(self.cursor.len());
        buf[..n].copy_from_slice(&self.cursor[..n]);
        self.cursor.drain(..n);
        Ok(n)
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbox.extend_from_slice(buf);
        self.accept_frames();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LinkChannel for SimulatedDevice {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;

    fn instant() -> SimulatorConfig {
        SimulatorConfig {
            time_scale: 0.0,
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn test_parse_frame() {
        assert_eq!(parse_frame("<3,2,10>"), Some((3, 2, 10)));
        assert_eq!(parse_frame("<3,2>"), None);
        assert_eq!(parse_frame("<3,2,1,0>"), None);
        assert_eq!(parse_frame("3,2,1"), None);
    }

    #[test]
    fn test_simulator_answers_a_trial() {
        let device = SimulatedDevice::new(instant());
        let log = device.command_log();
        let mut link = Link::from_channel("sim", Box::new(device));

        assert_eq!(link.read_line().unwrap().as_deref(), Some("y"));
        link.write("<4,2,1>").unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(link.read_line().unwrap().unwrap());
        }
        assert_eq!(seen, vec!["9", "1", "2", "3"]);
        assert_eq!(*log.lock().unwrap(), vec!["<4,2,1>".to_string()]);
    }

    #[test]
    fn test_frames_split_across_writes() {
        let mut device = SimulatedDevice::new(instant());
        device.write_all(b"<1,").unwrap();
        device.write_all(b"1,1><2,1,1>").unwrap();
        assert_eq!(
            *device.command_log().lock().unwrap(),
            vec!["<1,1,1>".to_string(), "<2,1,1>".to_string()]
        );
        // handshake + two trials of four codes each
        assert_eq!(device.outbox.len(), 9);
    }

    #[test]
    fn test_idle_read_times_out() {
        let mut device = SimulatedDevice::new(instant());
        device.set_timeout(Duration::from_millis(5)).unwrap();
        device.outbox.clear();
        let mut buf = [0u8; 8];
        let err = device.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_chatter_is_seeded() {
        let config = SimulatorConfig {
            time_scale: 0.0,
            chatter_probability: 1.0,
            seed: 7,
            ..SimulatorConfig::default()
        };
        let mut link = Link::from_channel("sim", Box::new(SimulatedDevice::new(config)));
        let first = link.read_line().unwrap().unwrap();
        assert!(CHATTER.contains(&first.as_str()));
        assert_eq!(link.read_line().unwrap().as_deref(), Some("y"));
    }
}
