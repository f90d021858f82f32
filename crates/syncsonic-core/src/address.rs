//! Speaker MAC address representation.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AddressError;

/// 48-bit Bluetooth device address.
///
/// The canonical textual form is uppercase colon-separated octets
/// (`AA:BB:CC:DD:EE:01`); parsing accepts any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    /// Parse from a MAC address string, canonicalizing case.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 || part.len() != 2 {
                return Err(AddressError::Invalid(s.to_string()));
            }
            octets[count] = u8::from_str_radix(part, 16)
                .map_err(|_| AddressError::Invalid(s.to_string()))?;
            count += 1;
        }
        if count != 6 {
            return Err(AddressError::Invalid(s.to_string()));
        }
        Ok(Mac(octets))
    }

    /// PulseAudio sink name for this speaker's A2DP sink.
    pub fn sink_name(&self) -> String {
        format!(
            "bluez_sink.{}.a2dp_sink",
            self.to_string().replace(':', "_")
        )
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for Mac {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mac::parse(s)
    }
}

impl Serialize for Mac {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Mac {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Mac::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_canonicalizes_case() {
        let mac = Mac::parse("aa:bb:cc:dd:ee:01").unwrap();
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:01");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Mac::parse("").is_err());
        assert!(Mac::parse("AA:BB:CC:DD:EE").is_err());
        assert!(Mac::parse("AA:BB:CC:DD:EE:01:02").is_err());
        assert!(Mac::parse("AA:BB:CC:DD:EE:GG").is_err());
        assert!(Mac::parse("AABBCCDDEE01").is_err());
    }

    #[test]
    fn sink_name_format() {
        let mac = Mac::parse("AA:BB:CC:DD:EE:01").unwrap();
        assert_eq!(mac.sink_name(), "bluez_sink.AA_BB_CC_DD_EE_01.a2dp_sink");
    }

    #[test]
    fn serde_round_trip() {
        let mac = Mac::parse("00:11:22:33:44:55").unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"00:11:22:33:44:55\"");
        let back: Mac = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn deserializes_lowercase() {
        let mac: Mac = serde_json::from_str("\"aa:bb:cc:dd:ee:ff\"").unwrap();
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
    }
}
