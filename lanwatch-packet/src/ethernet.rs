//! Ethernet II header parsing and frame construction

use bytes::{BufMut, BytesMut};
use lanwatch_core::MacAddr;
use std::fmt;

/// EtherType values the monitor cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    /// IPv4 (0x0800)
    IPv4,
    /// ARP (0x0806)
    ARP,
    /// VLAN-tagged frame (0x8100)
    VLAN,
    /// IPv6 (0x86DD)
    IPv6,
    /// Anything else
    Other(u16),
}

impl EtherType {
    pub fn to_u16(self) -> u16 {
        match self {
            EtherType::IPv4 => 0x0800,
            EtherType::ARP => 0x0806,
            EtherType::VLAN => 0x8100,
            EtherType::IPv6 => 0x86DD,
            EtherType::Other(val) => val,
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0800 => EtherType::IPv4,
            0x0806 => EtherType::ARP,
            0x8100 => EtherType::VLAN,
            0x86DD => EtherType::IPv6,
            val => EtherType::Other(val),
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::IPv4 => write!(f, "IPv4"),
            EtherType::ARP => write!(f, "ARP"),
            EtherType::VLAN => write!(f, "VLAN"),
            EtherType::IPv6 => write!(f, "IPv6"),
            EtherType::Other(val) => write!(f, "0x{:04X}", val),
        }
    }
}

/// Parsed Ethernet II header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub destination: MacAddr,
    pub source: MacAddr,
    /// EtherType of the payload (after any VLAN tag)
    pub ethertype: EtherType,
    /// VLAN id when the frame carried an 802.1Q tag
    pub vlan: Option<u16>,
    /// Offset of the payload within the frame
    pub payload_offset: usize,
}

impl EthernetHeader {
    /// Untagged header size
    pub const HEADER_SIZE: usize = 14;

    /// Minimum frame size without FCS
    pub const MIN_FRAME_SIZE: usize = 60;

    /// Parse the header, stepping over a single 802.1Q tag
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::HEADER_SIZE {
            return None;
        }

        let destination = MacAddr::from_slice(&data[0..6])?;
        let source = MacAddr::from_slice(&data[6..12])?;
        let mut ethertype = EtherType::from_u16(u16::from_be_bytes([data[12], data[13]]));
        let mut vlan = None;
        let mut payload_offset = Self::HEADER_SIZE;

        if ethertype == EtherType::VLAN {
            if data.len() < Self::HEADER_SIZE + 4 {
                return None;
            }
            let tci = u16::from_be_bytes([data[14], data[15]]);
            vlan = Some(tci & 0x0FFF);
            ethertype = EtherType::from_u16(u16::from_be_bytes([data[16], data[17]]));
            payload_offset += 4;
        }

        Some(Self {
            destination,
            source,
            ethertype,
            vlan,
            payload_offset,
        })
    }
}

/// Build an Ethernet II frame, zero-padded to the minimum frame size
pub fn build_ethernet_frame(
    destination: MacAddr,
    source: MacAddr,
    ethertype: EtherType,
    payload: &[u8],
) -> Vec<u8> {
    let len = (EthernetHeader::HEADER_SIZE + payload.len()).max(EthernetHeader::MIN_FRAME_SIZE);
    let mut buf = BytesMut::with_capacity(len);

    buf.put_slice(destination.as_bytes());
    buf.put_slice(source.as_bytes());
    buf.put_u16(ethertype.to_u16());
    buf.put_slice(payload);
    if buf.len() < len {
        buf.put_bytes(0, len - buf.len());
    }

    buf.to_vec()
}
