//! Device addresses on the shared link

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

/// Highest address an iPM accepts. Addresses outside 0-7 are ignored by the
/// device, so they are rejected here instead of being sent.
pub const MAX_ADDRESS: u8 = 7;

/// Selector for one instrument among several sharing one link
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "u8")]
pub struct Address(u8);

impl Address {
    /// Create an address, rejecting values outside 0-7
    pub fn new(value: i64) -> Result<Self, ProtocolError> {
        if (0..=MAX_ADDRESS as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ProtocolError::InvalidAddress(value))
        }
    }

    /// Numeric value
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Address {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Address::new(value)
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value: i64 = s
            .parse()
            .map_err(|_| ProtocolError::AddressSyntax(s.to_string()))?;
        Address::new(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range() {
        assert_eq!(Address::new(0).unwrap().value(), 0);
        assert_eq!(Address::new(7).unwrap().value(), 7);
        assert!(Address::new(8).is_err());
        assert!(Address::new(-1).is_err());
        assert!(Address::new(255).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("3".parse::<Address>().unwrap(), Address::new(3).unwrap());
        assert_eq!(" 5 ".parse::<Address>().unwrap().value(), 5);
        assert!("12".parse::<Address>().is_err());
    }

    #[test]
    fn test_parse_non_numeric_keeps_text() {
        let err = " abc".parse::<Address>().unwrap_err();
        assert!(matches!(&err, ProtocolError::AddressSyntax(text) if text == "abc"));
        assert_eq!(err.to_string(), "Address \"abc\" is not a number");
    }

    #[test]
    fn test_serde() {
        let addr: Address = serde_json::from_str("2").unwrap();
        assert_eq!(addr.value(), 2);
        assert!(serde_json::from_str::<Address>("9").is_err());
        assert_eq!(serde_json::to_string(&addr).unwrap(), "2");
    }
}
