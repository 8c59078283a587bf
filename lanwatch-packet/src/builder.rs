//! Fluent builder for Ethernet/IPv4/UDP|TCP frames

use crate::ethernet::{build_ethernet_frame, EtherType};
use crate::ipv4::{build_ipv4_packet, IpProtocol};
use crate::tcp::{build_tcp_segment, TcpFlags};
use crate::udp::build_udp_datagram;
use lanwatch_core::{Error, MacAddr, Result};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy)]
enum Layer4 {
    Udp {
        src_port: u16,
        dst_port: u16,
    },
    Tcp {
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
    },
}

/// Packet builder with a fluent API
///
/// ```
/// use std::net::Ipv4Addr;
/// use lanwatch_core::MacAddr;
/// use lanwatch_packet::{PacketBuilder, TcpFlags};
///
/// let syn = PacketBuilder::new()
///     .ethernet(MacAddr::new([0, 1, 2, 3, 4, 5]), MacAddr::new([6, 7, 8, 9, 10, 11]))
///     .ipv4(Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(1, 1, 1, 1))
///     .tcp(50000, 443, 1, 0, TcpFlags::SYN)
///     .build()
///     .unwrap();
/// assert_eq!(syn.len(), 60);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    ethernet: Option<(MacAddr, MacAddr)>,
    ipv4: Option<(Ipv4Addr, Ipv4Addr)>,
    ttl: u8,
    layer4: Option<Layer4>,
    payload: Vec<u8>,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self {
            ttl: 64,
            ..Default::default()
        }
    }

    /// Ethernet source and destination
    pub fn ethernet(mut self, src: MacAddr, dst: MacAddr) -> Self {
        self.ethernet = Some((src, dst));
        self
    }

    pub fn ipv4(mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        self.ipv4 = Some((src, dst));
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn udp(mut self, src_port: u16, dst_port: u16) -> Self {
        self.layer4 = Some(Layer4::Udp { src_port, dst_port });
        self
    }

    pub fn tcp(
        mut self,
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
    ) -> Self {
        self.layer4 = Some(Layer4::Tcp {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
        });
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Result<Vec<u8>> {
        let (src_mac, dst_mac) = self
            .ethernet
            .ok_or_else(|| Error::parsing("ethernet layer required"))?;
        let (src_ip, dst_ip) = self
            .ipv4
            .ok_or_else(|| Error::parsing("ipv4 layer required"))?;

        let (protocol, segment) = match self.layer4 {
            Some(Layer4::Udp { src_port, dst_port }) => (
                IpProtocol::UDP,
                build_udp_datagram(src_ip, dst_ip, src_port, dst_port, &self.payload),
            ),
            Some(Layer4::Tcp {
                src_port,
                dst_port,
                seq,
                ack,
                flags,
            }) => (
                IpProtocol::TCP,
                build_tcp_segment(
                    src_ip,
                    dst_ip,
                    src_port,
                    dst_port,
                    seq,
                    ack,
                    flags,
                    64240,
                    &self.payload,
                ),
            ),
            None => (IpProtocol::Other(253), self.payload),
        };

        let ip = build_ipv4_packet(src_ip, dst_ip, protocol, self.ttl, 0, &segment);
        Ok(build_ethernet_frame(dst_mac, src_mac, EtherType::IPv4, &ip))
    }
}
