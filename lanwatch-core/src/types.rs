//! Common types used throughout lanwatch

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// MAC Address (6 bytes)
///
/// The canonical text form is uppercase and colon-delimited
/// (`AA:BB:CC:DD:EE:FF`). Parsing accepts either case and the common
/// separators (`:`, `-`, `.`) or none at all, so every spelling of one
/// address canonicalizes to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Create a new MAC address
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Broadcast MAC address (FF:FF:FF:FF:FF:FF)
    pub const fn broadcast() -> Self {
        Self([0xff, 0xff, 0xff, 0xff, 0xff, 0xff])
    }

    /// Zero MAC address (00:00:00:00:00:00)
    pub const fn zero() -> Self {
        Self([0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
    }

    /// Build from the first six bytes of a slice
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = slice.get(..6)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Get bytes as slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to array
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    /// Group bit set (includes broadcast)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Addresses that can identify a single physical device
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast() && !self.is_zero()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::Error::InvalidMac(s.to_string());

        let digits: Vec<u8> = s
            .trim()
            .bytes()
            .filter(|b| !matches!(b, b':' | b'-' | b'.'))
            .collect();
        if digits.len() != 12 || !digits.iter().all(u8::is_ascii_hexdigit) {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (i, pair) in digits.chunks(2).enumerate() {
            let text = std::str::from_utf8(pair).map_err(|_| invalid())?;
            bytes[i] = u8::from_str_radix(text, 16).map_err(|_| invalid())?;
        }

        Ok(MacAddr(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Canonicalize a hardware address string (`aabbccddeeff` -> `AA:BB:CC:DD:EE:FF`)
pub fn canonicalize_mac(s: &str) -> crate::Result<String> {
    s.parse::<MacAddr>().map(|mac| mac.to_string())
}

/// Well-known ports the monitor cares about
pub mod ports {
    pub const DNS: u16 = 53;
    pub const HTTP: u16 = 80;
    pub const HTTPS: u16 = 443;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_display_is_uppercase() {
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0x0d, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "AA:BB:CC:0D:EE:FF");
    }

    #[test]
    fn test_mac_parse_spellings() {
        let expected = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        for spelling in [
            "AA:BB:CC:DD:EE:FF",
            "aa:bb:cc:dd:ee:ff",
            "AABBCCDDEEFF",
            "aabbccddeeff",
            "aa-bb-cc-dd-ee-ff",
            "aabb.ccdd.eeff",
            "  Aa:bB:cc:DD:ee:fF ",
        ] {
            assert_eq!(spelling.parse::<MacAddr>().unwrap(), expected, "{spelling}");
        }
    }

    #[test]
    fn test_canonicalize_idempotent() {
        for input in ["aabbccddeeff", "11:22:33:44:55:66", "0a-0B-0c-0D-0e-0F"] {
            let once = canonicalize_mac(input).unwrap();
            let twice = canonicalize_mac(&once).unwrap();
            assert_eq!(once, twice);
        }
        assert_eq!(
            canonicalize_mac("AABBCCDDEEFF").unwrap(),
            canonicalize_mac("aa:bb:cc:dd:ee:ff").unwrap()
        );
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        for input in [
            "",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "GG:BB:CC:DD:EE:FF",
            "+A:BB:CC:DD:EE:FF",
            "not a mac",
        ] {
            assert!(input.parse::<MacAddr>().is_err(), "{input}");
        }
    }

    #[test]
    fn test_mac_classification() {
        assert!(MacAddr::broadcast().is_multicast());
        assert!(!MacAddr::broadcast().is_unicast());
        assert!(!MacAddr::zero().is_unicast());
        assert!(MacAddr([0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb]).is_multicast());
        assert!(MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]).is_unicast());
    }

    #[test]
    fn test_mac_from_slice() {
        let data = [1, 2, 3, 4, 5, 6, 7];
        assert_eq!(MacAddr::from_slice(&data), Some(MacAddr([1, 2, 3, 4, 5, 6])));
        assert_eq!(MacAddr::from_slice(&data[..5]), None);
    }
}
