//! IPv4 header parsing and construction

use crate::checksum::internet_checksum;
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    ICMP,
    TCP,
    UDP,
    Other(u8),
}

impl IpProtocol {
    pub fn to_u8(self) -> u8 {
        match self {
            IpProtocol::ICMP => 1,
            IpProtocol::TCP => 6,
            IpProtocol::UDP => 17,
            IpProtocol::Other(val) => val,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => IpProtocol::ICMP,
            6 => IpProtocol::TCP,
            17 => IpProtocol::UDP,
            val => IpProtocol::Other(val),
        }
    }
}

/// Parsed IPv4 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes
    pub header_len: usize,
    /// Total length field (header + payload)
    pub total_len: usize,
    pub ttl: u8,
    pub protocol: IpProtocol,
    /// Fragment offset in 8-byte units
    pub fragment_offset: u16,
    pub more_fragments: bool,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    pub const MIN_HEADER_SIZE: usize = 20;

    /// Parse an IPv4 header; `None` if the bytes are not a sane IPv4 header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_HEADER_SIZE {
            return None;
        }

        let version = data[0] >> 4;
        let header_len = ((data[0] & 0x0F) as usize) * 4;
        if version != 4 || header_len < Self::MIN_HEADER_SIZE || data.len() < header_len {
            return None;
        }

        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if total_len < header_len {
            return None;
        }

        let flags_frag = u16::from_be_bytes([data[6], data[7]]);

        Some(Self {
            header_len,
            total_len,
            ttl: data[8],
            protocol: IpProtocol::from_u8(data[9]),
            fragment_offset: flags_frag & 0x1FFF,
            more_fragments: flags_frag & 0x2000 != 0,
            source: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            destination: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }

    /// Payload bytes, clipped to the total length field
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let end = self.total_len.min(data.len());
        if end <= self.header_len {
            return &[];
        }
        &data[self.header_len..end]
    }

    /// True for every fragment except the first
    pub fn is_trailing_fragment(&self) -> bool {
        self.fragment_offset != 0
    }
}

/// Build an IPv4 packet with a 20-byte header and a valid checksum
pub fn build_ipv4_packet(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: IpProtocol,
    ttl: u8,
    identification: u16,
    payload: &[u8],
) -> Vec<u8> {
    let total_len = Ipv4Header::MIN_HEADER_SIZE + payload.len();
    let mut buf = BytesMut::with_capacity(total_len);

    buf.put_u8(0x45);
    buf.put_u8(0);
    buf.put_u16(total_len as u16);
    buf.put_u16(identification);
    buf.put_u16(0x4000); // DF
    buf.put_u8(ttl);
    buf.put_u8(protocol.to_u8());
    buf.put_u16(0);
    buf.put_slice(&source.octets());
    buf.put_slice(&destination.octets());

    let checksum = internet_checksum(&buf[..Ipv4Header::MIN_HEADER_SIZE]);
    buf[10..12].copy_from_slice(&checksum.to_be_bytes());

    buf.put_slice(payload);
    buf.to_vec()
}
