//! Transport
//!
//! Line-oriented and fixed-length reads over a bidirectional byte stream.
//! The stream itself (a serial port, or one end of an in-memory pair) sits
//! behind the [`ByteStream`] trait; [`Transport`] owns the receive buffer so
//! that a binary payload arriving right behind a text line is never lost.

mod memory;
pub mod serial;

pub use memory::MemoryStream;
pub use serial::{list_ports, PortInfo, SerialStream};

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::protocol::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_RETRIES, DEFAULT_TIMEOUT_MS};

/// Largest single chunk pulled from a stream
const RECV_CHUNK: usize = 256;

/// A bidirectional byte stream
pub trait ByteStream: Send {
    /// Write all of `data` and flush it
    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Read whatever is available into `buf`, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` if nothing arrived in time.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProtocolError>;

    /// Drop bytes the stream has received but not yet delivered
    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Parameters for opening a serial link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name (e.g. "/dev/ttyS0")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl LinkConfig {
    /// Link on `port_name` at the default baud rate
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Bounds on every response read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadPolicy {
    /// Timeout of a single line or frame read in milliseconds
    pub timeout_ms: u64,
    /// Extra line reads allowed when nothing arrives
    pub retries: u32,
    /// How long silence is awaited after `ADR` in milliseconds
    pub ack_timeout_ms: u64,
}

impl ReadPolicy {
    /// Per-read timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Address acknowledgment timeout
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Total number of line reads per response
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Scale all timeouts, keeping the retry count
    pub fn scaled(self, factor: u64) -> Self {
        Self {
            timeout_ms: self.timeout_ms.saturating_mul(factor),
            ack_timeout_ms: self.ack_timeout_ms.saturating_mul(factor),
            ..self
        }
    }
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_READ_RETRIES,
            ack_timeout_ms: 200,
        }
    }
}

/// Buffered line/frame transport over a [`ByteStream`]
pub struct Transport {
    stream: Box<dyn ByteStream>,
    rx: Vec<u8>,
    tx_bytes: u64,
    rx_bytes: u64,
}

impl Transport {
    /// Wrap an already opened stream
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        Self {
            stream,
            rx: Vec::new(),
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Open a serial link
    pub fn open(config: &LinkConfig) -> Result<Self, ProtocolError> {
        let stream = SerialStream::open(config)?;
        Ok(Self::new(Box::new(stream)))
    }

    /// Two transports connected to each other in memory
    pub fn memory_pair() -> (Self, Self) {
        let (a, b) = MemoryStream::pair();
        (Self::new(Box::new(a)), Self::new(Box::new(b)))
    }

    /// Get cumulative tx/rx byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// Write bytes; every write is flushed immediately
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        debug!("tx {:?}", String::from_utf8_lossy(data));
        self.stream.send(data)?;
        self.tx_bytes += data.len() as u64;
        Ok(())
    }

    /// Read the next newline-terminated line, terminator included.
    ///
    /// Returns `None` if nothing arrives before `timeout`. If some text but
    /// no terminator arrives, that partial text is returned as-is.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, ProtocolError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.rx.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.rx.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).into_owned();
                debug!("rx line {:?}", line);
                return Ok(Some(line));
            }
            if self.fill(deadline)? == 0 && Instant::now() >= deadline {
                break;
            }
        }

        if self.rx.is_empty() {
            return Ok(None);
        }
        let partial: Vec<u8> = self.rx.drain(..).collect();
        let partial = String::from_utf8_lossy(&partial).into_owned();
        debug!("rx partial line {:?}", partial);
        Ok(Some(partial))
    }

    /// Read exactly `n` bytes.
    ///
    /// Fails with [`ProtocolError::ShortRead`] if fewer arrive before
    /// `timeout`; the partial bytes are discarded.
    pub fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let deadline = Instant::now() + timeout;
        while self.rx.len() < n {
            if self.fill(deadline)? == 0 && Instant::now() >= deadline {
                let received = self.rx.len();
                self.rx.clear();
                return Err(ProtocolError::ShortRead {
                    expected: n,
                    received,
                });
            }
        }
        let data: Vec<u8> = self.rx.drain(..n).collect();
        debug!("rx {} bytes: {:02x?}", data.len(), data);
        Ok(data)
    }

    /// Drop any buffered or pending input. Returns the number of bytes dropped.
    pub fn discard_input(&mut self) -> Result<usize, ProtocolError> {
        let mut dropped = self.rx.len();
        self.rx.clear();
        let mut buf = [0u8; RECV_CHUNK];
        loop {
            let n = self.stream.recv(&mut buf, Duration::ZERO)?;
            if n == 0 {
                break;
            }
            dropped += n;
        }
        self.stream.clear_input()?;
        if dropped > 0 {
            debug!("discarded {} stale bytes", dropped);
        }
        Ok(dropped)
    }

    /// Pull one chunk from the stream, waiting until `deadline` at most
    fn fill(&mut self, deadline: Instant) -> Result<usize, ProtocolError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(0);
        }
        let mut buf = [0u8; RECV_CHUNK];
        let n = self.stream.recv(&mut buf, remaining)?;
        self.rx.extend_from_slice(&buf[..n]);
        self.rx_bytes += n as u64;
        Ok(n)
    }
}
