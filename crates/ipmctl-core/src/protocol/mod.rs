//! iPM Protocol
//!
//! Implements the ASCII command / textual acknowledgment protocol spoken by
//! the intelligent power monitor, and the fixed-length binary frames that
//! follow a length header in query responses.
//!
//! Multi-byte frame fields are little-endian unless a table says otherwise.

mod address;
pub mod commands;
mod error;
pub mod frame;
pub mod table;

pub use address::{Address, MAX_ADDRESS};
pub use commands::Command;
pub use error::ProtocolError;
pub use frame::{BitResult, CrcCheck, DecodedField, DecodedFrame};
pub use table::{CommandSpec, Endianness, FieldSpec, FrameKind, FrameSpec, ProtocolTable, Severity};

/// Default baud rate for iPM communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for a single response read in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default number of additional reads when a response line is empty
pub const DEFAULT_READ_RETRIES: u32 = 5;

/// Settling time the device needs between `OFF` and `RESET` in milliseconds
pub const POWER_CYCLE_SETTLE_MS: u64 = 110;

/// Token that ends the emulator's listen loop
pub const SHUTDOWN_SENTINEL: &str = "x";
