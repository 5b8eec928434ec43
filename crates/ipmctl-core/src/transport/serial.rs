//! Serial port handling
//!
//! Opens the RS-232/RS-485 link to the iPM (8 data bits, no parity, one
//! stop bit, no flow control) and adapts it to [`ByteStream`].

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{ByteStream, LinkConfig};
use crate::protocol::ProtocolError;

/// Poll interval while waiting for input
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB product name, if the port is a USB adapter
    pub product: Option<String>,

    /// USB serial number, if available
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key: onboard ttyS* first, then USB adapters, then the rest by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyS"), (1, "ttyUSB"), (2, "ttyACM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // USB adapters the enumeration API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// A serial port adapted to [`ByteStream`]
pub struct SerialStream {
    port: Box<dyn SerialPort>,
}

impl SerialStream {
    /// Open and configure the port named in `config`
    pub fn open(config: &LinkConfig) -> Result<Self, ProtocolError> {
        info!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let mut port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                ProtocolError::ConnectionFailed(format!("{}: {}", config.port_name, e))
            })?;
        configure_port(port.as_mut())?;
        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        Ok(Self { port })
    }
}

/// Configure 8N1 without flow control
fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}

impl ByteStream for SerialStream {
    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.port
            .write_all(data)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProtocolError> {
        // Poll bytes_to_read() so a blocking read never outlives the timeout
        let start = Instant::now();
        loop {
            let available = self
                .port
                .bytes_to_read()
                .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

            if available > 0 {
                let to_read = std::cmp::min(available as usize, buf.len());
                return match self.port.read(&mut buf[..to_read]) {
                    Ok(n) => Ok(n),
                    Err(ref e)
                        if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock =>
                    {
                        Ok(0)
                    }
                    Err(e) => Err(ProtocolError::SerialError(e.to_string())),
                };
            }

            if start.elapsed() >= timeout {
                return Ok(0);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }
}

impl Drop for SerialStream {
    fn drop(&mut self) {
        debug!("Closing {:?}", self.port.name());
    }
}
