//! Downstream output
//!
//! Renders decoded frames as comma-separated lines for a data acquisition
//! consumer and ships them through a [`SampleSink`].
//!
//! Line format: `LABEL,yyyymmddThhmmss,v1,v2,...\r\n` with the timestamp in
//! UTC and reserved fields left out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::net::UdpSocket;
use tracing::{debug, warn};

use crate::protocol::{Address, DecodedField, DecodedFrame};

/// How field values are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    /// Physical value, with as many decimals as the scale factor resolves
    #[default]
    Scaled,
    /// Raw field, zero-padded hex of the field's width
    Hex,
}

/// Render one frame as a downstream line
pub fn format_line(frame: &DecodedFrame, timestamp: DateTime<Utc>, format: ValueFormat) -> String {
    let mut line = format!("{},{}", frame.kind.label(), timestamp.format("%Y%m%dT%H%M%S"));
    for field in frame.defined_fields() {
        line.push(',');
        line.push_str(&format_value(field, format));
    }
    line.push_str("\r\n");
    line
}

fn format_value(field: &DecodedField, format: ValueFormat) -> String {
    match format {
        ValueFormat::Scaled => format!("{:.*}", scale_decimals(field.scale), field.value),
        ValueFormat::Hex => format!("{:0width$x}", field.raw, width = field.byte_width * 2),
    }
}

/// Decimals needed to show a value at the resolution of its scale factor
fn scale_decimals(scale: f64) -> usize {
    if scale.is_nan() || scale <= 0.0 || scale >= 1.0 {
        return 0;
    }
    // Tolerate log10 landing a hair above an integer
    (-scale.log10() - 1e-9).ceil().clamp(0.0, 6.0) as usize
}

/// Destination for downstream lines
pub trait SampleSink {
    /// Deliver one line produced from `address`
    fn send_line(&mut self, address: Address, line: &str) -> io::Result<()>;
}

/// Sends each line as a UDP datagram to the port configured for its address
pub struct UdpSink {
    socket: UdpSocket,
    host: String,
    ports: HashMap<Address, u16>,
}

impl UdpSink {
    /// Bind an ephemeral local socket for sending to `host`
    pub fn new(host: impl Into<String>, ports: HashMap<Address, u16>) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        Ok(Self {
            socket,
            host: host.into(),
            ports,
        })
    }
}

impl SampleSink for UdpSink {
    fn send_line(&mut self, address: Address, line: &str) -> io::Result<()> {
        let Some(&port) = self.ports.get(&address) else {
            warn!("No downstream port for address {}, dropping line", address);
            return Ok(());
        };
        debug!("udp {}:{} <- {:?}", self.host, port, line);
        self.socket
            .send_to(line.as_bytes(), (self.host.as_str(), port))
            .map(|_| ())
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Lines received, with their source address
    pub lines: Vec<(Address, String)>,
}

impl SampleSink for MemorySink {
    fn send_line(&mut self, address: Address, line: &str) -> io::Result<()> {
        self.lines.push((address, line.to_string()));
        Ok(())
    }
}
