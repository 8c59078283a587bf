//! Layered view of a captured Ethernet frame

use crate::arp::ArpPacket;
use crate::ethernet::{EtherType, EthernetHeader};
use crate::ipv4::{IpProtocol, Ipv4Header};
use crate::tcp::TcpHeader;
use crate::udp::UdpHeader;
use lanwatch_core::{Error, Result};

/// Network layer of a parsed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    Arp(ArpPacket),
    Ipv4(Ipv4Header),
    /// EtherType the monitor does not decode
    Other(EtherType),
}

/// Transport layer of a parsed IPv4 packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp(UdpHeader),
    Tcp(TcpHeader),
}

/// A frame split into its layers, borrowing the application payload
#[derive(Debug, Clone)]
pub struct ParsedFrame<'a> {
    pub ethernet: EthernetHeader,
    pub network: Network,
    pub transport: Option<Transport>,
    /// Bytes above the outermost decoded header
    pub payload: &'a [u8],
}

impl<'a> ParsedFrame<'a> {
    /// Parse as far as the headers allow.
    ///
    /// A frame too short for its own headers is an error. Unknown
    /// EtherTypes, other IP protocols, and trailing fragments parse fine
    /// and just stop at the last layer understood.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let ethernet = EthernetHeader::parse(data)
            .ok_or_else(|| Error::parsing("truncated Ethernet header"))?;
        let l3 = &data[ethernet.payload_offset..];

        match ethernet.ethertype {
            EtherType::ARP => Ok(Self {
                ethernet,
                network: Network::Arp(ArpPacket::parse(l3)?),
                transport: None,
                payload: &[],
            }),
            EtherType::IPv4 => {
                let ip = Ipv4Header::parse(l3).ok_or_else(|| Error::parsing("bad IPv4 header"))?;
                let l4 = ip.payload(l3);

                if ip.is_trailing_fragment() {
                    return Ok(Self {
                        ethernet,
                        network: Network::Ipv4(ip),
                        transport: None,
                        payload: l4,
                    });
                }

                let (transport, payload) = match ip.protocol {
                    IpProtocol::UDP => {
                        let udp = UdpHeader::parse(l4)
                            .ok_or_else(|| Error::parsing("truncated UDP header"))?;
                        (Some(Transport::Udp(udp)), udp.payload(l4))
                    }
                    IpProtocol::TCP => {
                        let tcp = TcpHeader::parse(l4)
                            .ok_or_else(|| Error::parsing("truncated TCP header"))?;
                        (Some(Transport::Tcp(tcp)), &l4[tcp.header_len..])
                    }
                    _ => (None, l4),
                };

                Ok(Self {
                    ethernet,
                    network: Network::Ipv4(ip),
                    transport,
                    payload,
                })
            }
            other => Ok(Self {
                ethernet,
                network: Network::Other(other),
                transport: None,
                payload: l3,
            }),
        }
    }

    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        match &self.network {
            Network::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn arp(&self) -> Option<&ArpPacket> {
        match &self.network {
            Network::Arp(arp) => Some(arp),
            _ => None,
        }
    }
}
