//! Controller configuration
//!
//! Which addresses to poll, which queries to run at each, how often, and
//! where decoded lines go. Stored as JSON; every field has a default so a
//! partial file is valid.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::output::ValueFormat;
use crate::protocol::{Address, FrameKind};
use crate::transport::{LinkConfig, ReadPolicy};

/// Longest read or acknowledgment timeout a config may ask for
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Errors loading or validating a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid configuration JSON
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The values are out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Set of periodic queries for one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct QuerySet(u8);

impl QuerySet {
    /// `STATUS?`
    pub const STATUS: QuerySet = QuerySet(1);
    /// `MEASURE?`
    pub const MEASURE: QuerySet = QuerySet(2);
    /// `RECORD?`
    pub const RECORD: QuerySet = QuerySet(4);
    /// Every query
    pub const ALL: QuerySet = QuerySet(7);

    /// Bitmask value
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether the set includes the query for `kind`
    pub fn contains(self, kind: FrameKind) -> bool {
        let bit = match kind {
            FrameKind::Status => Self::STATUS.0,
            FrameKind::Measure => Self::MEASURE.0,
            FrameKind::Record => Self::RECORD.0,
            FrameKind::BitResult => return false,
        };
        self.0 & bit != 0
    }

    /// Frame kinds in the set, in polling order
    pub fn kinds(self) -> impl Iterator<Item = FrameKind> {
        [FrameKind::Status, FrameKind::Measure, FrameKind::Record]
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl TryFrom<u8> for QuerySet {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        if bits > Self::ALL.0 {
            return Err(format!("procqueries {} is outside 0-7", bits));
        }
        Ok(Self(bits))
    }
}

impl From<QuerySet> for u8 {
    fn from(set: QuerySet) -> Self {
        set.0
    }
}

impl Default for QuerySet {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.kinds().map(|k| k.label()).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Polling entry for one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConfig {
    /// Device address
    pub address: Address,
    /// Queries to run at this address
    #[serde(default)]
    pub procqueries: QuerySet,
    /// Downstream UDP port for lines from this address
    #[serde(default = "default_udp_port")]
    pub port: u16,
}

fn default_udp_port() -> u16 {
    30101
}

impl AddressConfig {
    /// Poll every query at `address`
    pub fn new(address: Address) -> Self {
        Self {
            address,
            procqueries: QuerySet::default(),
            port: default_udp_port(),
        }
    }
}

/// Full controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Serial link
    pub link: LinkConfig,
    /// Response read bounds
    pub read_policy: ReadPolicy,
    /// Addresses to verify and poll, in order
    pub addresses: Vec<AddressConfig>,
    /// Interval between STATUS/MEASURE passes in milliseconds
    pub measure_interval_ms: u64,
    /// Interval between RECORD queries in minutes
    pub record_period_min: u64,
    /// Downstream host for UDP lines
    pub udp_host: String,
    /// Scaled or raw hex values downstream
    pub value_format: ValueFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let first = AddressConfig::new(Address::default());
        Self {
            link: LinkConfig::default(),
            read_policy: ReadPolicy::default(),
            addresses: vec![first],
            measure_interval_ms: 1000,
            record_period_min: 10,
            udp_host: "127.0.0.1".to_string(),
            value_format: ValueFormat::default(),
        }
    }
}

impl ControllerConfig {
    /// Parse and validate JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check ranges and consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::Validation("no addresses configured".into()));
        }
        let mut seen = HashSet::new();
        for entry in &self.addresses {
            if !seen.insert(entry.address) {
                return Err(ConfigError::Validation(format!(
                    "address {} configured twice",
                    entry.address
                )));
            }
        }
        if self.read_policy.timeout_ms == 0 || self.read_policy.ack_timeout_ms == 0 {
            return Err(ConfigError::Validation("read timeouts must be non-zero".into()));
        }
        if self.read_policy.timeout_ms > MAX_TIMEOUT_MS
            || self.read_policy.ack_timeout_ms > MAX_TIMEOUT_MS
        {
            return Err(ConfigError::Validation(format!(
                "read timeouts must not exceed {} ms",
                MAX_TIMEOUT_MS
            )));
        }
        if self.measure_interval_ms == 0 {
            return Err(ConfigError::Validation("measure interval must be non-zero".into()));
        }
        if self.link.baud_rate == 0 {
            return Err(ConfigError::Validation("baud rate must be non-zero".into()));
        }
        Ok(())
    }

    /// Candidate addresses in configured order
    pub fn candidates(&self) -> Vec<Address> {
        self.addresses.iter().map(|a| a.address).collect()
    }

    /// Polling entry for `address`
    pub fn address(&self, address: Address) -> Option<&AddressConfig> {
        self.addresses.iter().find(|a| a.address == address)
    }

    /// Downstream port per address
    pub fn udp_ports(&self) -> HashMap<Address, u16> {
        self.addresses.iter().map(|a| (a.address, a.port)).collect()
    }
}
