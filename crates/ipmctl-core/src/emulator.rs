//! Device emulator
//!
//! Answers the iPM protocol from the device end of a link, using the same
//! protocol table as the controller. Every known command is answered with
//! its declared text response followed by its binary payload, if any.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::protocol::{Address, ProtocolError, ProtocolTable, SHUTDOWN_SENTINEL};
use crate::transport::Transport;

/// How long a single read waits before the listen loop checks again
const LISTEN_POLL: Duration = Duration::from_millis(100);

/// Longest unterminated token kept while waiting for its newline
const MAX_TOKEN_LEN: usize = 128;

/// What the emulator did with one token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Wrote this many bytes
    Sent(usize),
    /// Wrote nothing (silent acknowledgment, unknown token, absent device)
    Silent,
    /// The shutdown sentinel was received
    Terminate,
}

/// Simulated iPM on one end of a link
pub struct DeviceEmulator {
    transport: Transport,
    table: Arc<ProtocolTable>,
    /// Address selected by the last `ADR`
    selected: Option<Address>,
    /// Addresses with no instrument behind them
    absent: BTreeSet<Address>,
    /// Commands answered so far
    served: u64,
}

impl DeviceEmulator {
    /// Create an emulator answering from `table`
    pub fn new(transport: Transport, table: Arc<ProtocolTable>) -> Self {
        Self {
            transport,
            table,
            selected: None,
            absent: BTreeSet::new(),
            served: 0,
        }
    }

    /// Mark addresses that have no instrument.
    ///
    /// While one of them is selected only address selection is answered.
    pub fn with_absent(mut self, absent: impl IntoIterator<Item = Address>) -> Self {
        self.absent.extend(absent);
        self
    }

    /// Address selected by the last `ADR`
    pub fn selected(&self) -> Option<Address> {
        self.selected
    }

    /// Serve commands until the sentinel arrives or the peer hangs up.
    ///
    /// Returns the number of commands answered.
    pub fn listen(&mut self) -> Result<u64, ProtocolError> {
        info!("Emulator listening");
        let mut pending = String::new();
        loop {
            let chunk = match self.transport.read_line(LISTEN_POLL) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => continue,
                Err(ProtocolError::Disconnected) => {
                    info!("Link closed, emulator stopping");
                    return Ok(self.served);
                }
                Err(e) => return Err(e),
            };

            pending.push_str(&chunk);
            // A bare sentinel may arrive without a terminator
            if !pending.ends_with('\n') && pending != SHUTDOWN_SENTINEL {
                if pending.len() > MAX_TOKEN_LEN {
                    warn!("Discarding {} bytes without a line terminator", pending.len());
                    pending.clear();
                }
                continue;
            }

            let token = std::mem::take(&mut pending);
            match self.handle(&token) {
                Ok(Reply::Terminate) => {
                    info!("Shutdown sentinel received after {} command(s)", self.served);
                    return Ok(self.served);
                }
                Ok(_) => {}
                Err(ProtocolError::Disconnected) => {
                    info!("Link closed while replying, emulator stopping");
                    return Ok(self.served);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Answer one command token (terminator optional)
    pub fn handle(&mut self, token: &str) -> Result<Reply, ProtocolError> {
        let token = token.trim_end_matches(['\r', '\n']);
        debug!("Emulator received {:?}", token);

        if token == SHUTDOWN_SENTINEL {
            return Ok(Reply::Terminate);
        }

        let (message, argument) = match token.split_once(' ') {
            Some((message, argument)) => (message, Some(argument.trim())),
            None => (token, None),
        };

        let table = Arc::clone(&self.table);
        let Some(spec) = table.command(message) else {
            warn!("Unknown command {:?}, not answering", token);
            return Ok(Reply::Silent);
        };

        match (spec.takes_argument, argument) {
            (true, Some(argument)) => match argument.parse::<Address>() {
                Ok(address) => self.selected = Some(address),
                Err(e) => {
                    warn!("Bad argument in {:?}: {}", token, e);
                    return Ok(Reply::Silent);
                }
            },
            (true, None) => {
                warn!("{} needs an argument, not answering", message);
                return Ok(Reply::Silent);
            }
            (false, Some(_)) => {
                warn!("{} takes no argument, not answering {:?}", message, token);
                return Ok(Reply::Silent);
            }
            (false, None) => {
                if let Some(address) = self.selected.filter(|a| self.absent.contains(a)) {
                    debug!("No instrument at address {}, ignoring {}", address, message);
                    return Ok(Reply::Silent);
                }
            }
        }

        self.served += 1;
        let mut sent = 0;
        if !spec.expected_response.is_empty() {
            self.transport.write_bytes(spec.expected_response.as_bytes())?;
            sent += spec.expected_response.len();
        }
        if let Some(payload) = &spec.binary_payload {
            self.transport.write_bytes(payload)?;
            sent += payload.len();
        }

        Ok(if sent == 0 { Reply::Silent } else { Reply::Sent(sent) })
    }
}
