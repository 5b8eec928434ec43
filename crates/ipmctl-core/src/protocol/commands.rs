//! Protocol commands
//!
//! Defines the commands understood by the iPM.

use serde::{Deserialize, Serialize};

use super::{Address, FrameKind, ProtocolError};

/// Commands for iPM communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Turn the device off (`OFF`)
    Off,

    /// Turn the device on through a reset (`RESET`)
    Reset,

    /// Query the serial number (`SERNO?`)
    SerialNumber,

    /// Query the firmware version (`VER?`)
    Version,

    /// Execute the built-in self test (`TEST`)
    SelfTest,

    /// Query the self test result (`BITRESULT?`)
    BitResult,

    /// Select the active address (`ADR <n>`)
    SelectAddress(Address),

    /// Query a measurement frame (`MEASURE?`)
    Measure,

    /// Query a status frame (`STATUS?`)
    Status,

    /// Query a statistics record (`RECORD?`)
    Record,
}

impl Command {
    /// Message text as it appears in the protocol table, without arguments
    pub fn message(&self) -> &'static str {
        match self {
            Command::Off => "OFF",
            Command::Reset => "RESET",
            Command::SerialNumber => "SERNO?",
            Command::Version => "VER?",
            Command::SelfTest => "TEST",
            Command::BitResult => "BITRESULT?",
            Command::SelectAddress(_) => "ADR",
            Command::Measure => "MEASURE?",
            Command::Status => "STATUS?",
            Command::Record => "RECORD?",
        }
    }

    /// Full command line as written to the link, including the terminator
    pub fn to_line(&self) -> String {
        match self {
            Command::SelectAddress(address) => format!("ADR {}\n", address),
            other => format!("{}\n", other.message()),
        }
    }

    /// Convert command to bytes for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_line().into_bytes()
    }

    /// Binary frame that follows the text response, if any
    pub fn frame(&self) -> Option<FrameKind> {
        match self {
            Command::BitResult => Some(FrameKind::BitResult),
            Command::Measure => Some(FrameKind::Measure),
            Command::Status => Some(FrameKind::Status),
            Command::Record => Some(FrameKind::Record),
            _ => None,
        }
    }

    /// Parse a command token such as `MEASURE?` or `ADR 3`.
    ///
    /// A trailing line terminator is ignored.
    pub fn parse(token: &str) -> Result<Self, ProtocolError> {
        let token = token.trim_end_matches(['\n', '\r']);
        let (name, arg) = match token.split_once(' ') {
            Some((name, arg)) => (name, Some(arg)),
            None => (token, None),
        };

        let command = match (name, arg) {
            ("OFF", None) => Command::Off,
            ("RESET", None) => Command::Reset,
            ("SERNO?", None) => Command::SerialNumber,
            ("VER?", None) => Command::Version,
            ("TEST", None) => Command::SelfTest,
            ("BITRESULT?", None) => Command::BitResult,
            ("ADR", Some(arg)) => Command::SelectAddress(arg.parse()?),
            ("MEASURE?", None) => Command::Measure,
            ("STATUS?", None) => Command::Status,
            ("RECORD?", None) => Command::Record,
            _ => return Err(ProtocolError::UnknownCommand(token.to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(Command::Off.to_line(), "OFF\n");
        assert_eq!(Command::Measure.to_bytes(), b"MEASURE?\n".to_vec());
        let adr = Command::SelectAddress(Address::new(3).unwrap());
        assert_eq!(adr.to_line(), "ADR 3\n");
        assert_eq!(adr.message(), "ADR");
    }

    #[test]
    fn test_command_frames() {
        assert_eq!(Command::Measure.frame(), Some(FrameKind::Measure));
        assert_eq!(Command::BitResult.frame(), Some(FrameKind::BitResult));
        assert_eq!(Command::SerialNumber.frame(), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("RESET\n").unwrap(), Command::Reset);
        assert_eq!(Command::parse("RECORD?").unwrap(), Command::Record);
        assert_eq!(
            Command::parse("ADR 2\r\n").unwrap(),
            Command::SelectAddress(Address::new(2).unwrap())
        );
        assert!(matches!(
            Command::parse("ADR 12"),
            Err(ProtocolError::InvalidAddress(12))
        ));
        assert!(matches!(
            Command::parse("ADR"),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert!(matches!(
            Command::parse("HELLO"),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }
}
