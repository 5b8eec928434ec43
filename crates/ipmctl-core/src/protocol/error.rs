//! Protocol errors

use thiserror::Error;

/// Errors that can occur during iPM communication or table loading
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The link could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Serial port reported an error after opening
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The peer end of the link went away
    #[error("Link closed by peer")]
    Disconnected,

    /// No response line arrived within the retry budget
    #[error("No response to '{command}' after {attempts} read(s)")]
    Timeout {
        /// Command that was sent
        command: String,
        /// Number of reads attempted
        attempts: u32,
    },

    /// Fewer binary bytes than expected arrived before the timeout
    #[error("Short read: expected {expected} bytes, got {received}")]
    ShortRead {
        /// Bytes requested
        expected: usize,
        /// Bytes received before the timeout
        received: usize,
    },

    /// The text response differs from the declared response
    #[error("Command '{command}' expected response {expected:?}, got {actual:?}")]
    ResponseMismatch {
        /// Command that was sent
        command: String,
        /// Declared response
        expected: String,
        /// Received response
        actual: String,
    },

    /// A frame's field widths do not add up to its declared length
    #[error("Frame {frame} declares {declared} bytes but its fields cover {actual}")]
    FrameLayout {
        /// Frame name
        frame: String,
        /// Declared frame length
        declared: usize,
        /// Sum of field widths
        actual: usize,
    },

    /// A field uses a width the decoder cannot read
    #[error("Field {field} in frame {frame} has unsupported width {width}")]
    FieldWidth {
        /// Frame name
        frame: String,
        /// Field name
        field: String,
        /// Offending width
        width: usize,
    },

    /// Two table entries share a command message
    #[error("Duplicate command in protocol table: {0}")]
    DuplicateCommand(String),

    /// A command's declared payload or header disagrees with its frame
    #[error("Command '{command}' is inconsistent with frame {frame}: {reason}")]
    PayloadLength {
        /// Command message
        command: String,
        /// Frame name
        frame: String,
        /// What disagreed
        reason: String,
    },

    /// A command's frame kind has no layout in the table
    #[error("No frame layout for {0}")]
    MissingFrame(String),

    /// An accept pattern failed to compile
    #[error("Invalid response pattern for '{command}': {reason}")]
    InvalidPattern {
        /// Command message
        command: String,
        /// Compiler message
        reason: String,
    },

    /// Command text not present in the protocol table
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Address outside the supported range
    #[error("Invalid address {0}: must be 0-{max}", max = super::MAX_ADDRESS)]
    InvalidAddress(i64),

    /// Address text that is not a number
    #[error("Address {0:?} is not a number")]
    AddressSyntax(String),

    /// I/O error on the link
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error means the link itself is unusable.
    ///
    /// Link failures are always fatal, whatever the command's severity.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionFailed(_)
                | ProtocolError::SerialError(_)
                | ProtocolError::Disconnected
                | ProtocolError::IoError(_)
        )
    }

    /// Whether the error is a table/configuration error raised before any I/O
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameLayout { .. }
                | ProtocolError::FieldWidth { .. }
                | ProtocolError::DuplicateCommand(_)
                | ProtocolError::PayloadLength { .. }
                | ProtocolError::MissingFrame(_)
                | ProtocolError::InvalidPattern { .. }
                | ProtocolError::UnknownCommand(_)
                | ProtocolError::InvalidAddress(_)
                | ProtocolError::AddressSyntax(_)
        )
    }
}
