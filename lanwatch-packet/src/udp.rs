//! UDP header parsing and construction

use crate::checksum::transport_checksum;
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

/// Parsed UDP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    /// Length field (header + payload)
    pub length: usize,
    pub checksum: u16,
}

impl UdpHeader {
    pub const HEADER_SIZE: usize = 8;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::HEADER_SIZE {
            return None;
        }

        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        if length < Self::HEADER_SIZE {
            return None;
        }

        Some(Self {
            source_port: u16::from_be_bytes([data[0], data[1]]),
            destination_port: u16::from_be_bytes([data[2], data[3]]),
            length,
            checksum: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Datagram payload, clipped to the length field
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let end = self.length.min(data.len());
        &data[Self::HEADER_SIZE..end]
    }

    /// Either port is `port`
    pub fn involves_port(&self, port: u16) -> bool {
        self.source_port == port || self.destination_port == port
    }
}

/// Build a UDP datagram with the pseudo-header checksum filled in
pub fn build_udp_datagram(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let length = UdpHeader::HEADER_SIZE + payload.len();
    let mut buf = BytesMut::with_capacity(length);
    buf.put_u16(source_port);
    buf.put_u16(destination_port);
    buf.put_u16(length as u16);
    buf.put_u16(0);
    buf.put_slice(payload);

    let checksum = match transport_checksum(&src_ip.octets(), &dst_ip.octets(), 17, &buf) {
        0 => 0xFFFF,
        sum => sum,
    };
    buf[6..8].copy_from_slice(&checksum.to_be_bytes());
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datagram() {
        let bytes = build_udp_datagram(
            Ipv4Addr::new(192, 168, 1, 5),
            Ipv4Addr::new(192, 168, 1, 1),
            40000,
            53,
            b"hello",
        );
        let header = UdpHeader::parse(&bytes).unwrap();
        assert_eq!(header.source_port, 40000);
        assert_eq!(header.destination_port, 53);
        assert_eq!(header.length, 13);
        assert_ne!(header.checksum, 0);
        assert!(header.involves_port(53));
        assert_eq!(header.payload(&bytes), b"hello");
    }

    #[test]
    fn test_truncated_payload_is_clipped() {
        let bytes = build_udp_datagram(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 1, 2, b"abcdef");
        let header = UdpHeader::parse(&bytes[..10]).unwrap();
        assert_eq!(header.payload(&bytes[..10]), b"ab");
    }

    #[test]
    fn test_parse_rejects_short_length() {
        let mut bytes = [0u8; 8];
        bytes[5] = 4;
        assert!(UdpHeader::parse(&bytes).is_none());
    }
}
