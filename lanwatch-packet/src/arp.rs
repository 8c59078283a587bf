//! ARP packet structure, parsing, and the frames the spoofer sends

use crate::ethernet::{build_ethernet_frame, EtherType};
use bytes::{BufMut, BytesMut};
use lanwatch_core::{Error, MacAddr, Result};
use std::net::Ipv4Addr;

/// Hardware types
pub const HTYPE_ETHERNET: u16 = 1;

/// Protocol types
pub const PTYPE_IPV4: u16 = 0x0800;

/// Size of an Ethernet/IPv4 ARP body
pub const ARP_LEN: usize = 28;

/// ARP Operation Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOpcode {
    /// ARP Request
    Request = 1,
    /// ARP Reply
    Reply = 2,
}

impl ArpOpcode {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            _ => None,
        }
    }
}

/// ARP Packet (Ethernet hardware, IPv4 protocol)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    /// Operation
    pub operation: ArpOpcode,
    /// Sender hardware address
    pub sender_hw_addr: MacAddr,
    /// Sender protocol address
    pub sender_proto_addr: Ipv4Addr,
    /// Target hardware address
    pub target_hw_addr: MacAddr,
    /// Target protocol address
    pub target_proto_addr: Ipv4Addr,
}

impl ArpPacket {
    /// Create new ARP request
    pub fn new_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOpcode::Request,
            sender_hw_addr: sender_mac,
            sender_proto_addr: sender_ip,
            target_hw_addr: MacAddr::zero(),
            target_proto_addr: target_ip,
        }
    }

    /// Create new ARP reply
    pub fn new_reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: ArpOpcode::Reply,
            sender_hw_addr: sender_mac,
            sender_proto_addr: sender_ip,
            target_hw_addr: target_mac,
            target_proto_addr: target_ip,
        }
    }

    /// Parse ARP packet from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ARP_LEN {
            return Err(Error::parsing("ARP packet too short"));
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || data[4] != 6 || data[5] != 4 {
            return Err(Error::parsing("ARP packet is not Ethernet/IPv4"));
        }

        let op_val = u16::from_be_bytes([data[6], data[7]]);
        let operation =
            ArpOpcode::from_u16(op_val).ok_or_else(|| Error::parsing("Invalid ARP opcode"))?;

        let sender_hw_addr = MacAddr::from_slice(&data[8..14])
            .ok_or_else(|| Error::parsing("ARP sender address"))?;
        let sender_proto_addr = Ipv4Addr::new(data[14], data[15], data[16], data[17]);
        let target_hw_addr = MacAddr::from_slice(&data[18..24])
            .ok_or_else(|| Error::parsing("ARP target address"))?;
        let target_proto_addr = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        Ok(Self {
            operation,
            sender_hw_addr,
            sender_proto_addr,
            target_hw_addr,
            target_proto_addr,
        })
    }

    /// Serialize ARP packet to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(ARP_LEN);

        buf.put_u16(HTYPE_ETHERNET);
        buf.put_u16(PTYPE_IPV4);
        buf.put_u8(6);
        buf.put_u8(4);
        buf.put_u16(self.operation as u16);
        buf.put_slice(self.sender_hw_addr.as_bytes());
        buf.put_slice(&self.sender_proto_addr.octets());
        buf.put_slice(self.target_hw_addr.as_bytes());
        buf.put_slice(&self.target_proto_addr.octets());

        buf.to_vec()
    }

    /// Wrap in an Ethernet frame from the sender hardware address.
    /// Requests go to broadcast, replies to the target hardware address.
    pub fn to_frame(&self) -> Vec<u8> {
        let destination = match self.operation {
            ArpOpcode::Request => MacAddr::broadcast(),
            ArpOpcode::Reply => self.target_hw_addr,
        };
        build_ethernet_frame(
            destination,
            self.sender_hw_addr,
            EtherType::ARP,
            &self.serialize(),
        )
    }

    /// Check if this is a request
    pub fn is_request(&self) -> bool {
        self.operation == ArpOpcode::Request
    }

    /// Check if this is a reply
    pub fn is_reply(&self) -> bool {
        self.operation == ArpOpcode::Reply
    }

    /// Check if this is gratuitous ARP
    pub fn is_gratuitous(&self) -> bool {
        self.sender_proto_addr == self.target_proto_addr
    }
}

/// Forged reply telling `victim` that `impersonated_ip` lives at `our_mac`
pub fn spoof_reply(
    our_mac: MacAddr,
    impersonated_ip: Ipv4Addr,
    victim_mac: MacAddr,
    victim_ip: Ipv4Addr,
) -> Vec<u8> {
    ArpPacket::new_reply(our_mac, impersonated_ip, victim_mac, victim_ip).to_frame()
}

/// Truthful reply telling `victim` that `owner_ip` lives at `owner_mac`.
///
/// Both the Ethernet source and the ARP sender carry the real owner's
/// address so switches and caches learn the correct binding.
pub fn restore_reply(
    owner_mac: MacAddr,
    owner_ip: Ipv4Addr,
    victim_mac: MacAddr,
    victim_ip: Ipv4Addr,
) -> Vec<u8> {
    ArpPacket::new_reply(owner_mac, owner_ip, victim_mac, victim_ip).to_frame()
}

/// Broadcast who-has request for `target_ip`
pub fn request_frame(our_mac: MacAddr, our_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    ArpPacket::new_request(our_mac, our_ip, target_ip).to_frame()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethernet::EthernetHeader;

    const US: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const VICTIM: MacAddr = MacAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const GATEWAY: MacAddr = MacAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn body(frame: &[u8]) -> ArpPacket {
        let eth = EthernetHeader::parse(frame).unwrap();
        assert_eq!(eth.ethertype, EtherType::ARP);
        ArpPacket::parse(&frame[eth.payload_offset..]).unwrap()
    }

    #[test]
    fn test_arp_request_creation() {
        let packet = ArpPacket::new_request(US, Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2));

        assert_eq!(packet.operation, ArpOpcode::Request);
        assert!(packet.target_hw_addr.is_zero());
        assert!(packet.is_request());
        assert!(!packet.is_gratuitous());
    }

    #[test]
    fn test_arp_serialize_parse() {
        let packet = ArpPacket::new_reply(US, Ipv4Addr::new(10, 0, 0, 1), VICTIM, Ipv4Addr::new(10, 0, 0, 2));
        let bytes = packet.serialize();

        assert_eq!(bytes.len(), ARP_LEN);
        assert_eq!(ArpPacket::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ArpPacket::parse(&[0u8; 27]).is_err());

        let mut bytes = ArpPacket::new_request(US, Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST).serialize();
        bytes[7] = 9;
        assert!(ArpPacket::parse(&bytes).is_err());

        bytes[7] = 1;
        bytes[1] = 6; // IEEE 802 hardware type
        assert!(ArpPacket::parse(&bytes).is_err());
    }

    #[test]
    fn test_spoof_reply_claims_our_mac() {
        let gw_ip = Ipv4Addr::new(192, 168, 1, 1);
        let victim_ip = Ipv4Addr::new(192, 168, 1, 50);
        let frame = spoof_reply(US, gw_ip, VICTIM, victim_ip);

        let eth = EthernetHeader::parse(&frame).unwrap();
        assert_eq!(eth.source, US);
        assert_eq!(eth.destination, VICTIM);

        let arp = body(&frame);
        assert!(arp.is_reply());
        assert_eq!(arp.sender_hw_addr, US);
        assert_eq!(arp.sender_proto_addr, gw_ip);
        assert_eq!(arp.target_hw_addr, VICTIM);
        assert_eq!(arp.target_proto_addr, victim_ip);
    }

    #[test]
    fn test_restore_reply_uses_true_owner() {
        let gw_ip = Ipv4Addr::new(192, 168, 1, 1);
        let victim_ip = Ipv4Addr::new(192, 168, 1, 50);
        let frame = restore_reply(GATEWAY, gw_ip, VICTIM, victim_ip);

        let eth = EthernetHeader::parse(&frame).unwrap();
        assert_eq!(eth.source, GATEWAY);
        assert_eq!(eth.destination, VICTIM);

        let arp = body(&frame);
        assert_eq!(arp.sender_hw_addr, GATEWAY);
        assert_eq!(arp.sender_proto_addr, gw_ip);
    }

    #[test]
    fn test_request_frame_is_broadcast() {
        let frame = request_frame(US, Ipv4Addr::new(192, 168, 1, 2), Ipv4Addr::new(192, 168, 1, 3));
        let eth = EthernetHeader::parse(&frame).unwrap();
        assert!(eth.destination.is_broadcast());
        assert!(body(&frame).is_request());
    }
}
