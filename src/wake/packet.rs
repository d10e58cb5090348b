//! Hardware addresses and the magic packet format.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a magic packet: 6 sync bytes plus 16 copies of the MAC.
pub const MAGIC_PACKET_LEN: usize = 102;

/// Conventional discard port used for Wake-on-LAN.
pub const DEFAULT_WOL_PORT: u16 = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid hardware address: {0}")]
pub struct MacParseError(String);

/// A 6-byte link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let sep = if s.contains(':') { ':' } else { '-' };

        let mut octets = [0u8; 6];
        let mut parts = s.split(sep);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| MacParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(MacParseError(s.to_string()));
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Build the wake payload for `mac`.
pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.0);
    }
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_and_dash_forms() {
        let a: MacAddress = "C0:18:50:AC:E1:A5".parse().unwrap();
        let b: MacAddress = "c0-18-50-ac-e1-a5".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.octets(), [0xC0, 0x18, 0x50, 0xAC, 0xE1, 0xA5]);
        assert_eq!(a.to_string(), "c0:18:50:ac:e1:a5");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "c0:18:50:ac:e1", "c0:18:50:ac:e1:a5:00", "c0:18:50:ac:e1:zz", "c018:50:ac:e1:a5"] {
            assert!(bad.parse::<MacAddress>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_magic_packet_layout() {
        let mac = MacAddress::new([0x00, 0x50, 0x56, 0xAB, 0xCD, 0xEF]);
        let packet = magic_packet(&mac);

        assert_eq!(packet.len(), 102);
        assert_eq!(packet[..6], [0xFF; 6]);
        for i in 0..16 {
            let start = 6 + i * 6;
            assert_eq!(packet[start..start + 6], mac.octets(), "repetition {i}");
        }
    }

    #[test]
    fn test_serde_uses_text_form() {
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"01:02:03:04:05:06\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
