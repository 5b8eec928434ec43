//! Device controller
//!
//! Drives an iPM over a [`Transport`] through power sequencing, per-address
//! verification and sampling. Every command's response is checked against
//! the protocol table; what happens on a wrong or missing response is the
//! [`Severity`] the table declares for that command.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::protocol::frame::check_record_crc;
use crate::protocol::{
    Address, BitResult, Command, CrcCheck, DecodedFrame, FrameKind, ProtocolError, ProtocolTable,
    Severity, POWER_CYCLE_SETTLE_MS, SHUTDOWN_SENTINEL,
};
use crate::transport::{ReadPolicy, Transport};

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Not initialized, or power-cycled off
    Off,
    /// `RESET` acknowledged; device powered
    On,
    /// Walking the candidate addresses
    Verifying,
    /// Steady-state polling
    Sampling,
    /// A fatal failure left the device in an unknown state
    Failed,
}

/// Raw reply to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Text line as received (empty for a silent acknowledgment)
    pub text: String,
    /// Binary frame that followed the text, if the command has one
    pub payload: Option<Vec<u8>>,
}

/// One decoded frame from one address
#[derive(Debug, Clone)]
pub struct AddressSample {
    /// Address the frame came from
    pub address: Address,
    /// Time the frame was read
    pub timestamp: DateTime<Utc>,
    /// Decoded values
    pub frame: DecodedFrame,
}

/// Result of a command after its severity has been applied
enum Step {
    Done(Response),
    Failed(Severity),
}

/// Controller for one link, shared by every address on it
pub struct DeviceController {
    transport: Transport,
    table: Arc<ProtocolTable>,
    policy: ReadPolicy,
    state: ControllerState,
    selected: Option<Address>,
}

impl DeviceController {
    /// Create a controller over an open transport
    pub fn new(transport: Transport, table: Arc<ProtocolTable>, policy: ReadPolicy) -> Self {
        Self {
            transport,
            table,
            policy,
            state: ControllerState::Off,
            selected: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Address selected by the last acknowledged `ADR`
    pub fn selected(&self) -> Option<Address> {
        self.selected
    }

    /// Protocol table in use
    pub fn table(&self) -> &Arc<ProtocolTable> {
        &self.table
    }

    /// Transport byte counters (tx, rx)
    pub fn counters(&self) -> (u64, u64) {
        self.transport.counters()
    }

    /// Power-cycle the device and verify each candidate address.
    ///
    /// Returns the addresses that answered `SERNO?`, in candidate order.
    /// Fails if a fatal command (`OFF`, `RESET`, `ADR`) is not acknowledged
    /// or the link breaks.
    pub fn initialize(&mut self, candidates: &[Address]) -> Result<Vec<Address>, ProtocolError> {
        self.state = ControllerState::Off;
        self.selected = None;
        info!("Power cycling device");

        self.step(&Command::Off)?;
        std::thread::sleep(Duration::from_millis(POWER_CYCLE_SETTLE_MS));
        self.step(&Command::Reset)?;
        self.state = ControllerState::On;

        let mut verified = Vec::with_capacity(candidates.len());
        for &address in candidates {
            if verified.contains(&address) {
                warn!("Address {} listed twice, verifying once", address);
                continue;
            }
            info!("Verifying address {}", address);
            self.state = ControllerState::Verifying;
            if self.verify(address)? {
                verified.push(address);
            } else {
                warn!("Dropping address {}: no valid serial number", address);
            }
        }

        info!(
            "Verified {} of {} address(es): {:?}",
            verified.len(),
            candidates.len(),
            verified.iter().map(|a| a.value()).collect::<Vec<_>>()
        );
        Ok(verified)
    }

    /// Verify one address. `Ok(false)` means the address is dropped.
    fn verify(&mut self, address: Address) -> Result<bool, ProtocolError> {
        let sequence = [
            Command::SelectAddress(address),
            Command::SerialNumber,
            Command::Version,
            Command::SelfTest,
            Command::BitResult,
        ];
        for command in &sequence {
            match self.step(command)? {
                Step::Done(response) => {
                    if *command == Command::BitResult {
                        self.report_self_test(address, response);
                    }
                }
                Step::Failed(Severity::DropAddress) => return Ok(false),
                Step::Failed(_) => {}
            }
        }
        Ok(true)
    }

    fn report_self_test(&self, address: Address, response: Response) {
        let Some(data) = response.payload else {
            return;
        };
        match self.table.decode(FrameKind::BitResult, &data) {
            Ok(frame) => {
                let result = BitResult::evaluate(frame);
                if result.passed {
                    info!("Address {}: self test passed", address);
                } else {
                    warn!(
                        "Address {}: self test failed, status word {:#06x}",
                        address,
                        result.status_word()
                    );
                }
                for field in result.frame.defined_fields() {
                    debug!("  {} = {} {}", field.name, field.value, field.unit);
                }
            }
            Err(e) => warn!("Address {}: undecodable self test frame: {}", address, e),
        }
    }

    /// One sampling pass: `MEASURE?` at every verified address.
    ///
    /// Addresses that fail are skipped for this pass only. Call repeatedly at
    /// whatever cadence the caller needs.
    pub fn sample(&mut self, verified: &[Address]) -> Result<Vec<AddressSample>, ProtocolError> {
        let mut samples = Vec::with_capacity(verified.len());
        for &address in verified {
            if let Some(frame) = self.poll(address, FrameKind::Measure)? {
                samples.push(AddressSample {
                    address,
                    timestamp: Utc::now(),
                    frame,
                });
            }
        }
        Ok(samples)
    }

    /// Select `address`, fetch one frame of `kind` and decode it.
    ///
    /// `Ok(None)` means the address was skipped (no reply, wrong reply,
    /// short frame); the reason has been logged.
    pub fn poll(
        &mut self,
        address: Address,
        kind: FrameKind,
    ) -> Result<Option<DecodedFrame>, ProtocolError> {
        self.state = ControllerState::Sampling;

        // The device keeps its selection between queries
        if self.selected != Some(address) {
            if let Step::Failed(_) = self.step(&Command::SelectAddress(address))? {
                return Ok(None);
            }
        }
        let response = match self.step(&kind.command())? {
            Step::Done(response) => response,
            Step::Failed(_) => {
                warn!("Skipping {} at address {} for this pass", kind, address);
                return Ok(None);
            }
        };
        let Some(data) = response.payload else {
            warn!("{} at address {} returned no frame", kind, address);
            return Ok(None);
        };

        if kind == FrameKind::Record {
            match check_record_crc(&data, self.table.byte_order()) {
                Some(CrcCheck::Mismatch { computed, received }) => warn!(
                    "RECORD at address {}: CRC mismatch (computed {:#010x}, received {:#010x})",
                    address, computed, received
                ),
                Some(CrcCheck::Match(crc)) => debug!("RECORD CRC {:#010x} ok", crc),
                None => {}
            }
        }

        match self.table.decode(kind, &data) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!("{} at address {}: {}", kind, address, e);
                Ok(None)
            }
        }
    }

    /// Send one command and check its response against the table.
    ///
    /// Reads the binary frame too when the command has one. Errors are
    /// returned whatever the command's severity; they are logged first.
    pub fn execute(&mut self, command: &Command) -> Result<Response, ProtocolError> {
        let table = Arc::clone(&self.table);
        let spec = table.spec_for(command)?;
        let line = command.to_line();
        let name = line.trim_end();

        self.transport.discard_input()?;
        self.transport.write_bytes(line.as_bytes())?;

        let result = if spec.expected_response.is_empty() {
            self.read_ack()
        } else {
            self.read_response(name)
        };
        let text = match result {
            Ok(text) => text,
            Err(e) => {
                self.log_failure(spec.severity, name, &e);
                return Err(e);
            }
        };

        if !spec.matches(&text) {
            let e = ProtocolError::ResponseMismatch {
                command: name.to_string(),
                expected: spec.expected_response.clone(),
                actual: text,
            };
            self.log_failure(spec.severity, name, &e);
            return Err(e);
        }

        if let Command::SelectAddress(address) = command {
            self.selected = Some(*address);
        }

        let payload = match spec.frame.and_then(|kind| table.frame(kind)) {
            Some(frame) => match self.transport.read_exact(frame.length, self.policy.timeout()) {
                Ok(data) => Some(data),
                Err(e) => {
                    self.log_failure(spec.severity, name, &e);
                    return Err(e);
                }
            },
            None => None,
        };

        Ok(Response { text, payload })
    }

    /// Ask an emulator on the other end of the link to stop listening
    pub fn stop_emulator(&mut self) -> Result<(), ProtocolError> {
        info!("Sending shutdown sentinel");
        self.transport
            .write_bytes(format!("{}\n", SHUTDOWN_SENTINEL).as_bytes())
    }

    /// Run a command and apply its severity
    fn step(&mut self, command: &Command) -> Result<Step, ProtocolError> {
        match self.execute(command) {
            Ok(response) => Ok(Step::Done(response)),
            Err(e) if e.is_link_failure() => {
                self.state = ControllerState::Failed;
                Err(e)
            }
            Err(e) => {
                let severity = self.table.spec_for(command)?.severity;
                if severity == Severity::Fatal {
                    self.state = ControllerState::Failed;
                    return Err(e);
                }
                Ok(Step::Failed(severity))
            }
        }
    }

    /// Read a text response, retrying a bounded number of empty reads
    fn read_response(&mut self, name: &str) -> Result<String, ProtocolError> {
        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            if let Some(line) = self.transport.read_line(self.policy.timeout())? {
                return Ok(line);
            }
            debug!("No response to '{}' (read {}/{})", name, attempt, attempts);
        }
        Err(ProtocolError::Timeout {
            command: name.to_string(),
            attempts,
        })
    }

    /// Read a silent acknowledgment: nothing, or a bare newline
    fn read_ack(&mut self) -> Result<String, ProtocolError> {
        let text = self
            .transport
            .read_line(self.policy.ack_timeout())?
            .unwrap_or_default();
        if text.trim_end_matches(['\r', '\n']).is_empty() {
            Ok(String::new())
        } else {
            Ok(text)
        }
    }

    fn log_failure(&self, severity: Severity, name: &str, e: &ProtocolError) {
        if severity == Severity::Fatal || e.is_link_failure() {
            error!("'{}' failed: {}", name, e);
        } else {
            warn!("'{}' failed ({:?}): {}", name, severity, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::DeviceEmulator;
    use pretty_assertions::assert_eq;
    use std::thread;

    fn fast_policy() -> ReadPolicy {
        ReadPolicy {
            timeout_ms: 200,
            retries: 1,
            ack_timeout_ms: 50,
        }
    }

    fn with_emulator(absent: &[u8]) -> (DeviceController, thread::JoinHandle<()>) {
        let table = Arc::new(ProtocolTable::standard().unwrap());
        let (ctrl_end, emu_end) = Transport::memory_pair();
        let absent: Vec<Address> = absent
            .iter()
            .map(|a| Address::new(*a as i64).unwrap())
            .collect();
        let mut emulator = DeviceEmulator::new(emu_end, Arc::clone(&table)).with_absent(absent);
        let handle = thread::spawn(move || {
            emulator.listen().unwrap();
        });
        (DeviceController::new(ctrl_end, table, fast_policy()), handle)
    }

    fn addrs(values: &[u8]) -> Vec<Address> {
        values.iter().map(|v| Address::new(*v as i64).unwrap()).collect()
    }

    #[test]
    fn test_execute_measure_reads_frame() {
        let (mut ctrl, emu) = with_emulator(&[]);
        let response = ctrl.execute(&Command::Measure).unwrap();
        assert_eq!(response.text, "34\n");
        assert_eq!(response.payload.map(|p| p.len()), Some(34));
        drop(ctrl);
        emu.join().unwrap();
    }

    #[test]
    fn test_select_address_ack_is_silent() {
        let (mut ctrl, emu) = with_emulator(&[]);
        let address = Address::new(5).unwrap();
        let response = ctrl.execute(&Command::SelectAddress(address)).unwrap();
        assert_eq!(response.text, "");
        assert_eq!(ctrl.selected(), Some(address));
        drop(ctrl);
        emu.join().unwrap();
    }

    #[test]
    fn test_initialize_keeps_order() {
        let (mut ctrl, emu) = with_emulator(&[]);
        let verified = ctrl.initialize(&addrs(&[2, 0, 1])).unwrap();
        assert_eq!(verified, addrs(&[2, 0, 1]));
        assert_eq!(ctrl.state(), ControllerState::Verifying);
        drop(ctrl);
        emu.join().unwrap();
    }

    #[test]
    fn test_initialize_without_candidates_stays_on() {
        let (mut ctrl, emu) = with_emulator(&[]);
        assert_eq!(ctrl.state(), ControllerState::Off);
        assert_eq!(ctrl.initialize(&[]).unwrap(), Vec::<Address>::new());
        assert_eq!(ctrl.state(), ControllerState::On);
        drop(ctrl);
        emu.join().unwrap();
    }

    #[test]
    fn test_initialize_ignores_duplicates() {
        let (mut ctrl, emu) = with_emulator(&[]);
        let verified = ctrl.initialize(&addrs(&[0, 0, 3])).unwrap();
        assert_eq!(verified, addrs(&[0, 3]));
        drop(ctrl);
        emu.join().unwrap();
    }

    #[test]
    fn test_sample_skips_silent_address() {
        let (mut ctrl, emu) = with_emulator(&[1]);
        let samples = ctrl.sample(&addrs(&[0, 1, 2])).unwrap();
        let seen: Vec<u8> = samples.iter().map(|s| s.address.value()).collect();
        assert_eq!(seen, vec![0, 2]);
        assert_eq!(ctrl.state(), ControllerState::Sampling);
        drop(ctrl);
        emu.join().unwrap();
    }

    #[test]
    fn test_poll_status_and_record() {
        let (mut ctrl, emu) = with_emulator(&[]);
        let address = Address::new(0).unwrap();

        let status = ctrl.poll(address, FrameKind::Status).unwrap().unwrap();
        assert_eq!(status.kind, FrameKind::Status);
        assert_eq!(status.raw("OPSTATE"), Some(2));

        let record = ctrl.poll(address, FrameKind::Record).unwrap().unwrap();
        assert_eq!(record.kind, FrameKind::Record);
        assert_eq!(record.raw("POWERCNT"), Some(3));
        drop(ctrl);
        emu.join().unwrap();
    }

    #[test]
    fn test_timeout_is_bounded() {
        let table = Arc::new(ProtocolTable::standard().unwrap());
        let (ctrl_end, _silent_peer) = Transport::memory_pair();
        let mut ctrl = DeviceController::new(ctrl_end, table, fast_policy());

        let err = ctrl.execute(&Command::Version).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Timeout { ref command, attempts: 2 } if command == "VER?"
        ));
    }

    #[test]
    fn test_off_timeout_is_fatal() {
        let table = Arc::new(ProtocolTable::standard().unwrap());
        let (ctrl_end, _silent_peer) = Transport::memory_pair();
        let mut ctrl = DeviceController::new(ctrl_end, table, fast_policy());

        assert!(ctrl.initialize(&addrs(&[0])).is_err());
        assert_eq!(ctrl.state(), ControllerState::Failed);
    }

    #[test]
    fn test_link_closed_is_fatal() {
        let table = Arc::new(ProtocolTable::standard().unwrap());
        let (ctrl_end, peer) = Transport::memory_pair();
        drop(peer);
        let mut ctrl = DeviceController::new(ctrl_end, table, fast_policy());

        let err = ctrl.poll(Address::new(0).unwrap(), FrameKind::Measure).unwrap_err();
        assert!(err.is_link_failure());
        assert_eq!(ctrl.state(), ControllerState::Failed);
    }

    #[test]
    fn test_counters_track_traffic() {
        let (mut ctrl, emu) = with_emulator(&[]);
        ctrl.execute(&Command::Off).unwrap();
        assert_eq!(ctrl.counters(), (4, 3));
        drop(ctrl);
        emu.join().unwrap();
    }
}
