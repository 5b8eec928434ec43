//! Protocol table
//!
//! The immutable catalog of commands, their declared responses, the binary
//! payloads an emulator sends with them, and the field layouts of each
//! binary frame. A table is validated once when it is built and is then
//! shared read-only (typically behind an `Arc`) by controllers and emulators.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::frame::{seal_record_crc, DecodedFrame};
use super::{Command, ProtocolError};

/// Byte order of multi-byte frame fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Least significant byte first (the iPM's native order)
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

/// What a controller does when a command's response is wrong or missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Abort: the device is in an unknown state
    Fatal,
    /// Remove the current address from the verified set
    DropAddress,
    /// Skip the current address for this sampling pass only
    SkipPass,
    /// Log and carry on with the next step
    Continue,
}

/// Binary frame types returned after a length header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FrameKind {
    /// Self test result (`BITRESULT?`)
    BitResult,
    /// Measurement (`MEASURE?`)
    Measure,
    /// Device status (`STATUS?`)
    Status,
    /// Statistics record (`RECORD?`)
    Record,
}

impl FrameKind {
    /// Label used in logs and downstream lines
    pub fn label(&self) -> &'static str {
        match self {
            FrameKind::BitResult => "BITRESULT",
            FrameKind::Measure => "MEASURE",
            FrameKind::Status => "STATUS",
            FrameKind::Record => "RECORD",
        }
    }

    /// Command that fetches this frame
    pub fn command(&self) -> Command {
        match self {
            FrameKind::BitResult => Command::BitResult,
            FrameKind::Measure => Command::Measure,
            FrameKind::Status => Command::Status,
            FrameKind::Record => Command::Record,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One named field inside a binary frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name (e.g. "FREQ")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Unit of the scaled value
    pub unit: String,

    /// Width in bytes (1, 2 or 4)
    pub byte_width: usize,

    /// Multiplier from raw unsigned integer to physical value
    pub scale: f64,
}

impl FieldSpec {
    /// Create a new field
    pub fn new(
        byte_width: usize,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        scale: f64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            unit: unit.into(),
            byte_width,
            scale,
        }
    }

    /// Placeholder for bytes the device leaves undefined
    pub fn reserved(byte_width: usize) -> Self {
        Self::new(byte_width, "reserved", "Reserved", "", 1.0)
    }

    /// Whether the field carries no defined quantity
    pub fn is_reserved(&self) -> bool {
        self.name == "reserved"
    }

    /// Convert a raw value to a physical value
    pub fn raw_to_display(&self, raw: u32) -> f64 {
        raw as f64 * self.scale
    }
}

/// Ordered field layout of one frame kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSpec {
    /// Frame kind
    pub kind: FrameKind,

    /// Declared length in bytes
    pub length: usize,

    /// Fields in wire order
    pub fields: Vec<FieldSpec>,
}

impl FrameSpec {
    /// Create a frame layout (not validated until it joins a table)
    pub fn new(kind: FrameKind, length: usize, fields: Vec<FieldSpec>) -> Self {
        Self {
            kind,
            length,
            fields,
        }
    }

    /// Sum of all field widths
    pub fn fields_width(&self) -> usize {
        self.fields.iter().map(|f| f.byte_width).sum()
    }

    /// Check field widths and that they exactly cover the declared length
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let Some(bad) = self
            .fields
            .iter()
            .find(|f| !matches!(f.byte_width, 1 | 2 | 4))
        {
            return Err(ProtocolError::FieldWidth {
                frame: self.kind.label().to_string(),
                field: bad.name.clone(),
                width: bad.byte_width,
            });
        }

        let actual = self.fields_width();
        if actual != self.length {
            return Err(ProtocolError::FrameLayout {
                frame: self.kind.label().to_string(),
                declared: self.length,
                actual,
            });
        }
        Ok(())
    }
}

/// One command, its declared response and optional binary payload
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Command text, unique across the table
    pub message: String,

    /// Declared text response including its newline (empty for none)
    pub expected_response: String,

    /// Additional responses accepted by a controller (device-specific text)
    pub accept: Option<Regex>,

    /// Bytes an emulator sends straight after the text response
    pub binary_payload: Option<Vec<u8>>,

    /// Frame that follows the text response
    pub frame: Option<FrameKind>,

    /// Whether the command carries an argument (`ADR <n>`)
    pub takes_argument: bool,

    /// Controller reaction to a wrong or missing response
    pub severity: Severity,

    /// Human-readable description
    pub description: String,
}

impl CommandSpec {
    /// Create a command with a literal response
    pub fn new(message: impl Into<String>, expected_response: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expected_response: expected_response.into(),
            accept: None,
            binary_payload: None,
            frame: None,
            takes_argument: false,
            severity: Severity::Continue,
            description: String::new(),
        }
    }

    /// Set the description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the mismatch severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach the frame that follows the response
    pub fn with_frame(mut self, frame: FrameKind) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Attach the emulator's binary payload
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.binary_payload = Some(payload);
        self
    }

    /// Mark the command as taking an argument
    pub fn with_argument(mut self) -> Self {
        self.takes_argument = true;
        self
    }

    /// Also accept responses matching `pattern`
    pub fn with_accept(mut self, pattern: &str) -> Result<Self, ProtocolError> {
        let regex = Regex::new(pattern).map_err(|e| ProtocolError::InvalidPattern {
            command: self.message.clone(),
            reason: e.to_string(),
        })?;
        self.accept = Some(regex);
        Ok(self)
    }

    /// Whether `response` is an acceptable answer to this command
    pub fn matches(&self, response: &str) -> bool {
        response == self.expected_response
            || self
                .accept
                .as_ref()
                .map(|re| re.is_match(response))
                .unwrap_or(false)
    }

    /// Exact bytes an emulator writes in reply: text response then payload
    pub fn reply_bytes(&self) -> Vec<u8> {
        let mut bytes = self.expected_response.as_bytes().to_vec();
        if let Some(payload) = &self.binary_payload {
            bytes.extend_from_slice(payload);
        }
        bytes
    }
}

/// Validated, immutable protocol catalog
#[derive(Debug, Clone)]
pub struct ProtocolTable {
    commands: Vec<CommandSpec>,
    frames: Vec<FrameSpec>,
    byte_order: Endianness,
}

impl ProtocolTable {
    /// Build and validate a table.
    ///
    /// Fails before any I/O if a command message repeats, a frame's widths
    /// don't cover its declared length, or a command's length header or
    /// payload disagrees with its frame.
    pub fn new(
        commands: Vec<CommandSpec>,
        frames: Vec<FrameSpec>,
        byte_order: Endianness,
    ) -> Result<Self, ProtocolError> {
        let mut seen = HashSet::new();
        for spec in &commands {
            if !seen.insert(spec.message.as_str()) {
                return Err(ProtocolError::DuplicateCommand(spec.message.clone()));
            }
        }

        for frame in &frames {
            frame.validate()?;
        }

        for spec in &commands {
            let Some(kind) = spec.frame else {
                continue;
            };
            let frame = frames
                .iter()
                .find(|f| f.kind == kind)
                .ok_or_else(|| ProtocolError::MissingFrame(kind.label().to_string()))?;

            let header = format!("{}\n", frame.length);
            if spec.expected_response != header {
                return Err(ProtocolError::PayloadLength {
                    command: spec.message.clone(),
                    frame: kind.label().to_string(),
                    reason: format!(
                        "length header {:?} does not announce {} bytes",
                        spec.expected_response, frame.length
                    ),
                });
            }
            if let Some(payload) = &spec.binary_payload {
                if payload.len() != frame.length {
                    return Err(ProtocolError::PayloadLength {
                        command: spec.message.clone(),
                        frame: kind.label().to_string(),
                        reason: format!(
                            "payload is {} bytes, frame is {}",
                            payload.len(),
                            frame.length
                        ),
                    });
                }
            }
        }

        Ok(Self {
            commands,
            frames,
            byte_order,
        })
    }

    /// The iPM command set with its frame layouts and emulator payloads
    pub fn standard() -> Result<Self, ProtocolError> {
        let frames = standard_frames();
        let commands = standard_commands(&frames, Endianness::Little)?;
        Self::new(commands, frames, Endianness::Little)
    }

    /// All commands in table order
    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    /// All frame layouts
    pub fn frames(&self) -> &[FrameSpec] {
        &self.frames
    }

    /// Byte order of multi-byte fields
    pub fn byte_order(&self) -> Endianness {
        self.byte_order
    }

    /// Look up a command by its message text
    pub fn command(&self, message: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.message == message)
    }

    /// Look up the table entry for a command
    pub fn spec_for(&self, command: &Command) -> Result<&CommandSpec, ProtocolError> {
        self.command(command.message())
            .ok_or_else(|| ProtocolError::UnknownCommand(command.message().to_string()))
    }

    /// Look up a frame layout
    pub fn frame(&self, kind: FrameKind) -> Option<&FrameSpec> {
        self.frames.iter().find(|f| f.kind == kind)
    }

    /// Decode `data` as a frame of `kind` into a fresh result
    pub fn decode(&self, kind: FrameKind, data: &[u8]) -> Result<DecodedFrame, ProtocolError> {
        let frame = self
            .frame(kind)
            .ok_or_else(|| ProtocolError::MissingFrame(kind.label().to_string()))?;
        frame.decode(data, self.byte_order)
    }
}

/// Frame layouts of the iPM
pub fn standard_frames() -> Vec<FrameSpec> {
    vec![
        bitresult_frame(),
        measure_frame(),
        status_frame(),
        record_frame(),
    ]
}

/// The iPM command set, with emulator payloads encoded from sample values
pub fn standard_commands(
    frames: &[FrameSpec],
    byte_order: Endianness,
) -> Result<Vec<CommandSpec>, ProtocolError> {
    let payload = |kind: FrameKind, raw: &[u32]| -> Result<Vec<u8>, ProtocolError> {
        let frame = frames
            .iter()
            .find(|f| f.kind == kind)
            .ok_or_else(|| ProtocolError::MissingFrame(kind.label().to_string()))?;
        frame.encode(raw, byte_order)
    };

    let mut record = payload(FrameKind::Record, &SAMPLE_RECORD)?;
    seal_record_crc(&mut record, byte_order);

    Ok(vec![
        CommandSpec::new("OFF", "OK\n")
            .describe("Turn device off")
            .with_severity(Severity::Fatal),
        CommandSpec::new("RESET", "OK\n")
            .describe("Turn device on (reset)")
            .with_severity(Severity::Fatal),
        CommandSpec::new("SERNO?", "203456\n")
            .describe("Query serial number")
            .with_severity(Severity::DropAddress)
            .with_accept(r"^[0-9]{6}(-[0-9])?\n$")?,
        CommandSpec::new("VER?", "VER A022(L) 2018-11-13\n")
            .describe("Query firmware version")
            .with_accept(r"^VER \S.*\n$")?,
        CommandSpec::new("TEST", "OK\n").describe("Execute built-in self test"),
        CommandSpec::new("BITRESULT?", "24\n")
            .describe("Query self test result")
            .with_frame(FrameKind::BitResult)
            .with_payload(payload(FrameKind::BitResult, &SAMPLE_BITRESULT)?),
        CommandSpec::new("ADR", "")
            .describe("Select device address")
            .with_argument()
            .with_severity(Severity::Fatal),
        CommandSpec::new("MEASURE?", "34\n")
            .describe("Device measurement")
            .with_severity(Severity::SkipPass)
            .with_frame(FrameKind::Measure)
            .with_payload(payload(FrameKind::Measure, &SAMPLE_MEASURE)?),
        CommandSpec::new("STATUS?", "12\n")
            .describe("Device status")
            .with_severity(Severity::SkipPass)
            .with_frame(FrameKind::Status)
            .with_payload(payload(FrameKind::Status, &SAMPLE_STATUS)?),
        CommandSpec::new("RECORD?", "68\n")
            .describe("Device statistics")
            .with_severity(Severity::SkipPass)
            .with_frame(FrameKind::Record)
            .with_payload(record),
    ])
}

// Raw sample values served by the emulator, one per field in wire order.

const SAMPLE_BITRESULT: [u32; 12] = [0, 512, 1023, 511, 511, 521, 0, 0, 0, 0, 0, 253];

// 60.0 Hz, 51.7 C, 65.1 V on phases A and B
const SAMPLE_MEASURE: [u32; 19] = [
    600, 0, 517, 651, 651, 0, 1542, 1542, 0, 10, 11, 0, 0, 2400, 0, 12, 13, 0, 1,
];

const SAMPLE_STATUS: [u32; 5] = [2, 1, 0, 0, 0];

const SAMPLE_RECORD: [u32; 33] = [
    1, 2, 3, 3_600_000, 0, 0, // event, state, count, time, flags
    1195, 1210, 1198, 1207, 0, 0, // rms min/max
    599, 601, // frequency min/max
    10, 12, 9, 11, 0, 0, // dc min/max
    12, 15, 11, 14, 0, 0, // thd min/max
    1690, 1712, 1694, 1708, 0, 0, // peak min/max
    0, // crc, sealed after encoding
];

fn bitresult_frame() -> FrameSpec {
    FrameSpec::new(
        FrameKind::BitResult,
        24,
        vec![
            FieldSpec::new(2, "bitStatus", "Self test status word", "", 1.0),
            FieldSpec::new(2, "hREFV", "Half reference voltage", "V", 0.00489),
            FieldSpec::new(2, "VREFV", "Reference voltage", "V", 0.00489),
            FieldSpec::new(2, "FIVEV", "+5V supply", "V", 0.00978),
            FieldSpec::new(2, "FIVEVA", "+5VA supply", "V", 0.00978),
            FieldSpec::new(2, "RDV", "Relay drive voltage", "V", 0.05376),
            FieldSpec::reserved(2),
            FieldSpec::reserved(2),
            FieldSpec::new(2, "ITVA", "Phase A input test voltage", "V", 0.00489),
            FieldSpec::new(2, "ITVB", "Phase B input test voltage", "V", 0.00489),
            FieldSpec::new(2, "ITVC", "Phase C input test voltage", "V", 0.00489),
            FieldSpec::new(2, "TEMP", "Temperature", "C", 0.1),
        ],
    )
}

fn measure_frame() -> FrameSpec {
    FrameSpec::new(
        FrameKind::Measure,
        34,
        vec![
            FieldSpec::new(2, "FREQ", "AC power frequency", "Hz", 0.1),
            FieldSpec::reserved(2),
            FieldSpec::new(2, "T", "Temperature", "C", 0.1),
            FieldSpec::new(2, "VRMSA", "Phase A RMS AC voltage", "V", 0.1),
            FieldSpec::new(2, "VRMSB", "Phase B RMS AC voltage", "V", 0.1),
            FieldSpec::new(2, "VRMSC", "Phase C RMS AC voltage", "V", 0.1),
            FieldSpec::new(2, "VPKA", "Phase A peak AC voltage", "V", 0.001),
            FieldSpec::new(2, "VPKB", "Phase B peak AC voltage", "V", 0.001),
            FieldSpec::new(2, "VPKC", "Phase C peak AC voltage", "V", 0.001),
            FieldSpec::new(2, "VDCA", "Phase A DC component", "V", 0.001),
            FieldSpec::new(2, "VDCB", "Phase B DC component", "V", 0.001),
            FieldSpec::new(2, "VDCC", "Phase C DC component", "V", 0.001),
            FieldSpec::new(2, "PHA", "Phase A phase angle", "deg", 0.1),
            FieldSpec::new(2, "PHB", "Phase B phase angle", "deg", 0.1),
            FieldSpec::new(2, "PHC", "Phase C phase angle", "deg", 0.1),
            FieldSpec::new(1, "THDA", "Phase A voltage THD", "%", 0.1),
            FieldSpec::new(1, "THDB", "Phase B voltage THD", "%", 0.1),
            FieldSpec::new(1, "THDC", "Phase C voltage THD", "%", 0.1),
            FieldSpec::new(1, "POWEROK", "Power OK, all phases", "", 1.0),
        ],
    )
}

fn status_frame() -> FrameSpec {
    FrameSpec::new(
        FrameKind::Status,
        12,
        vec![
            FieldSpec::new(1, "OPSTATE", "Operational state", "", 1.0),
            FieldSpec::new(1, "POWEROK", "Power OK", "", 1.0),
            FieldSpec::new(4, "TRIPFLAGS", "Power trip flags", "", 1.0),
            FieldSpec::new(4, "CAUTIONFLAGS", "Power caution flags", "", 1.0),
            FieldSpec::new(2, "BITSTAT", "Self test status", "", 1.0),
        ],
    )
}

fn record_frame() -> FrameSpec {
    let mut fields = vec![
        FieldSpec::new(1, "EVTYPE", "Event type", "", 1.0),
        FieldSpec::new(1, "OPSTATE", "Operating state", "", 1.0),
        FieldSpec::new(4, "POWERCNT", "Power-up count", "", 1.0),
        FieldSpec::new(4, "TIME", "Elapsed time since power-up", "ms", 1.0),
        FieldSpec::new(4, "TFLAG", "Trip flags", "", 1.0),
        FieldSpec::new(4, "CFLAG", "Caution flags", "", 1.0),
    ];

    per_phase(&mut fields, 2, "VRMS", "RMS voltage", "V", 0.1);
    fields.push(FieldSpec::new(2, "FREQMIN", "Frequency min", "Hz", 0.1));
    fields.push(FieldSpec::new(2, "FREQMAX", "Frequency max", "Hz", 0.1));
    per_phase(&mut fields, 2, "VDC", "DC component", "V", 0.001);
    per_phase(&mut fields, 1, "THD", "voltage THD", "%", 0.1);
    per_phase(&mut fields, 2, "VPK", "peak voltage", "V", 0.1);
    fields.push(FieldSpec::new(4, "CRC", "CRC-32 of preceding bytes", "", 1.0));

    FrameSpec::new(FrameKind::Record, 68, fields)
}

/// Push min/max fields for phases A, B and C (e.g. VRMSMINA, VRMSMAXA, ...)
fn per_phase(
    fields: &mut Vec<FieldSpec>,
    width: usize,
    stem: &str,
    what: &str,
    unit: &str,
    scale: f64,
) {
    for phase in ['A', 'B', 'C'] {
        for (bound, label) in [("MIN", "min"), ("MAX", "max")] {
            fields.push(FieldSpec::new(
                width,
                format!("{stem}{bound}{phase}"),
                format!("Phase {phase} {what} {label}"),
                unit,
                scale,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_standard_table_loads() {
        let table = ProtocolTable::standard().unwrap();
        assert_eq!(table.commands().len(), 10);
        assert_eq!(table.byte_order(), Endianness::Little);
        for frame in table.frames() {
            assert_eq!(frame.fields_width(), frame.length, "{}", frame.kind);
        }
    }

    #[test]
    fn test_frame_lengths() {
        let table = ProtocolTable::standard().unwrap();
        let lengths: Vec<(FrameKind, usize)> =
            table.frames().iter().map(|f| (f.kind, f.length)).collect();
        assert_eq!(
            lengths,
            vec![
                (FrameKind::BitResult, 24),
                (FrameKind::Measure, 34),
                (FrameKind::Status, 12),
                (FrameKind::Record, 68),
            ]
        );
    }

    #[test]
    fn test_record_field_names() {
        let frame = record_frame();
        let names: Vec<&str> = frame.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(&names[6..8], &["VRMSMINA", "VRMSMAXA"]);
        assert_eq!(names[8], "VRMSMINB");
        assert_eq!(names.last(), Some(&"CRC"));
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let mut frames = standard_frames();
        // Drop the last four 1-byte fields: 34 declared, 30 covered
        frames[1].fields.truncate(15);
        let err = ProtocolTable::new(Vec::new(), frames, Endianness::Little).unwrap_err();
        match err {
            ProtocolError::FrameLayout {
                frame,
                declared,
                actual,
            } => {
                assert_eq!(frame, "MEASURE");
                assert_eq!(declared, 34);
                assert_eq!(actual, 30);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_width_rejected() {
        let frame = FrameSpec::new(
            FrameKind::Status,
            3,
            vec![FieldSpec::new(3, "ODD", "", "", 1.0)],
        );
        assert!(matches!(
            frame.validate(),
            Err(ProtocolError::FieldWidth { width: 3, .. })
        ));
    }

    #[test]
    fn test_duplicate_command_rejected() {
        let commands = vec![CommandSpec::new("OFF", "OK\n"), CommandSpec::new("OFF", "OK\n")];
        let err = ProtocolTable::new(commands, Vec::new(), Endianness::Little).unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateCommand(m) if m == "OFF"));
    }

    #[test]
    fn test_header_must_announce_frame_length() {
        let commands = vec![CommandSpec::new("MEASURE?", "30\n").with_frame(FrameKind::Measure)];
        let err = ProtocolTable::new(commands, standard_frames(), Endianness::Little).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadLength { .. }));
    }

    #[test]
    fn test_payload_must_match_frame_length() {
        let commands = vec![CommandSpec::new("STATUS?", "12\n")
            .with_frame(FrameKind::Status)
            .with_payload(vec![0; 11])];
        let err = ProtocolTable::new(commands, standard_frames(), Endianness::Little).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadLength { .. }));
    }

    #[test]
    fn test_missing_frame_rejected() {
        let commands = vec![CommandSpec::new("STATUS?", "12\n").with_frame(FrameKind::Status)];
        let err = ProtocolTable::new(commands, Vec::new(), Endianness::Little).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingFrame(_)));
    }

    #[test]
    fn test_accept_patterns() {
        let table = ProtocolTable::standard().unwrap();
        let serno = table.command("SERNO?").unwrap();
        assert!(serno.matches("203456\n"));
        assert!(serno.matches("123456\n"));
        assert!(serno.matches("203456-7\n"));
        assert!(!serno.matches("12345\n"));
        assert!(!serno.matches(""));

        let off = table.command("OFF").unwrap();
        assert!(off.matches("OK\n"));
        assert!(!off.matches("OK"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = CommandSpec::new("VER?", "VER\n").with_accept("(").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPattern { .. }));
    }

    #[test]
    fn test_reply_bytes() {
        let table = ProtocolTable::standard().unwrap();
        let measure = table.command("MEASURE?").unwrap();
        let reply = measure.reply_bytes();
        assert_eq!(reply.len(), 3 + 34);
        assert_eq!(&reply[..3], b"34\n");
        assert_eq!(
            &reply[3..17],
            &[0x58, 0x02, 0x00, 0x00, 0x05, 0x02, 0x8b, 0x02, 0x8b, 0x02, 0x00, 0x00, 0x06, 0x06]
        );

        assert!(table.command("ADR").unwrap().reply_bytes().is_empty());
    }

    #[test]
    fn test_severities() {
        let table = ProtocolTable::standard().unwrap();
        let severity = |m: &str| table.command(m).unwrap().severity;
        assert_eq!(severity("OFF"), Severity::Fatal);
        assert_eq!(severity("RESET"), Severity::Fatal);
        assert_eq!(severity("ADR"), Severity::Fatal);
        assert_eq!(severity("SERNO?"), Severity::DropAddress);
        assert_eq!(severity("VER?"), Severity::Continue);
        assert_eq!(severity("TEST"), Severity::Continue);
        assert_eq!(severity("BITRESULT?"), Severity::Continue);
        assert_eq!(severity("MEASURE?"), Severity::SkipPass);
    }
}
