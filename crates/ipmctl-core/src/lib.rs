//! # ipmctl Core Library
//!
//! Core functionality for driving a multi-drop, serial-attached intelligent
//! power monitor (iPM).
//!
//! This library provides:
//! - The protocol table: commands, declared responses and frame layouts
//! - Binary frame decoding with scale conversion
//! - A line/binary transport over serial ports or an in-memory link
//! - The device controller (power sequencing, address verification, sampling)
//! - A device emulator that answers the same protocol without hardware
//! - Downstream line formatting for data-acquisition consumers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ipmctl_core::prelude::*;
//!
//! let table = Arc::new(ProtocolTable::standard()?);
//! let transport = Transport::open(&LinkConfig::new("/dev/ttyS0"))?;
//! let mut controller = DeviceController::new(transport, table, ReadPolicy::default());
//!
//! let verified = controller.initialize(&[Address::new(0)?, Address::new(1)?])?;
//! loop {
//!     for sample in controller.sample(&verified)? {
//!         println!("{}: FREQ={:?}", sample.address, sample.frame.value("FREQ"));
//!     }
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod emulator;
pub mod output;
pub mod protocol;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AddressConfig, ConfigError, ControllerConfig, QuerySet};
    pub use crate::controller::{AddressSample, ControllerState, DeviceController, Response};
    pub use crate::emulator::{DeviceEmulator, Reply};
    pub use crate::output::{format_line, MemorySink, SampleSink, UdpSink, ValueFormat};
    pub use crate::protocol::{
        Address, Command, CommandSpec, DecodedFrame, Endianness, FieldSpec, FrameKind, FrameSpec,
        ProtocolError, ProtocolTable, Severity,
    };
    pub use crate::transport::{ByteStream, LinkConfig, ReadPolicy, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
