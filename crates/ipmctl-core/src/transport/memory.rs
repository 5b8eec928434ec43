//! In-memory byte stream
//!
//! Two connected endpoints backed by channels. Used to run the controller
//! against the emulator without a serial device.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use super::ByteStream;
use crate::protocol::ProtocolError;

/// One end of an in-memory link
#[derive(Debug)]
pub struct MemoryStream {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    /// Remainder of a chunk that did not fit the caller's buffer
    pending: Vec<u8>,
}

impl MemoryStream {
    /// Create two connected endpoints
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                pending: Vec::new(),
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                pending: Vec::new(),
            },
        )
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = std::cmp::min(buf.len(), self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl ByteStream for MemoryStream {
    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| ProtocolError::Disconnected)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProtocolError> {
        if !self.pending.is_empty() {
            return Ok(self.take_pending(buf));
        }

        let chunk = if timeout.is_zero() {
            match self.rx.try_recv() {
                Ok(chunk) => chunk,
                Err(TryRecvError::Empty) => return Ok(0),
                Err(TryRecvError::Disconnected) => return Err(ProtocolError::Disconnected),
            }
        } else {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(ProtocolError::Disconnected),
            }
        };

        self.pending = chunk;
        Ok(self.take_pending(buf))
    }
}
