//! TCP header parsing and construction

use crate::checksum::transport_checksum;
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

/// TCP flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub const NONE: TcpFlags = TcpFlags::from_u8(0x00);
    pub const SYN: TcpFlags = TcpFlags::from_u8(0x02);
    pub const SYN_ACK: TcpFlags = TcpFlags::from_u8(0x12);
    pub const ACK: TcpFlags = TcpFlags::from_u8(0x10);
    pub const RST: TcpFlags = TcpFlags::from_u8(0x04);

    pub const fn from_u8(value: u8) -> Self {
        Self {
            fin: value & 0x01 != 0,
            syn: value & 0x02 != 0,
            rst: value & 0x04 != 0,
            psh: value & 0x08 != 0,
            ack: value & 0x10 != 0,
            urg: value & 0x20 != 0,
            ece: value & 0x40 != 0,
            cwr: value & 0x80 != 0,
        }
    }

    pub fn to_u8(self) -> u8 {
        (self.fin as u8)
            | (self.syn as u8) << 1
            | (self.rst as u8) << 2
            | (self.psh as u8) << 3
            | (self.ack as u8) << 4
            | (self.urg as u8) << 5
            | (self.ece as u8) << 6
            | (self.cwr as u8) << 7
    }

    /// First segment of a three-way handshake
    pub fn is_connection_attempt(&self) -> bool {
        self.syn && !self.ack
    }
}

/// Parsed TCP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    /// Header length in bytes
    pub header_len: usize,
    pub flags: TcpFlags,
    pub window: u16,
}

impl TcpHeader {
    pub const MIN_HEADER_SIZE: usize = 20;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_HEADER_SIZE {
            return None;
        }

        let header_len = ((data[12] >> 4) as usize) * 4;
        if header_len < Self::MIN_HEADER_SIZE || data.len() < header_len {
            return None;
        }

        Some(Self {
            source_port: u16::from_be_bytes([data[0], data[1]]),
            destination_port: u16::from_be_bytes([data[2], data[3]]),
            sequence: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            acknowledgment: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            header_len,
            flags: TcpFlags::from_u8(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
        })
    }
}

/// Build a TCP segment (no options) with the pseudo-header checksum filled in
#[allow(clippy::too_many_arguments)]
pub fn build_tcp_segment(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    sequence: u32,
    acknowledgment: u32,
    flags: TcpFlags,
    window: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(TcpHeader::MIN_HEADER_SIZE + payload.len());
    buf.put_u16(source_port);
    buf.put_u16(destination_port);
    buf.put_u32(sequence);
    buf.put_u32(acknowledgment);
    buf.put_u8(5 << 4);
    buf.put_u8(flags.to_u8());
    buf.put_u16(window);
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_slice(payload);

    let checksum = transport_checksum(&src_ip.octets(), &dst_ip.octets(), 6, &buf);
    buf[16..18].copy_from_slice(&checksum.to_be_bytes());
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_bits() {
        assert_eq!(TcpFlags::SYN.to_u8(), 0x02);
        assert_eq!(TcpFlags::SYN_ACK.to_u8(), 0x12);
        assert_eq!(TcpFlags::from_u8(0xFF).to_u8(), 0xFF);
        assert!(TcpFlags::SYN.is_connection_attempt());
        assert!(!TcpFlags::SYN_ACK.is_connection_attempt());
        assert!(!TcpFlags::ACK.is_connection_attempt());
    }

    #[test]
    fn test_parse_segment() {
        let seg = build_tcp_segment(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            51000,
            443,
            1000,
            0,
            TcpFlags::SYN,
            64240,
            &[],
        );
        let header = TcpHeader::parse(&seg).unwrap();
        assert_eq!(header.source_port, 51000);
        assert_eq!(header.destination_port, 443);
        assert_eq!(header.sequence, 1000);
        assert_eq!(header.header_len, 20);
        assert_eq!(header.flags, TcpFlags::SYN);
    }

    #[test]
    fn test_parse_rejects_bad_offset() {
        let mut seg = [0u8; 20];
        seg[12] = 0x40; // 16 byte header
        assert!(TcpHeader::parse(&seg).is_none());
        assert!(TcpHeader::parse(&[0u8; 19]).is_none());
    }
}
