//! Packet parsing and construction for lanwatch
//!
//! The monitor only needs to look at a handful of headers, so this crate
//! stays small:
//!
//! - [`ethernet`] - Ethernet II header parsing (with one 802.1Q tag) and frame building
//! - [`ipv4`] - IPv4 header parsing and construction
//! - [`udp`] / [`tcp`] - transport headers
//! - [`arp`] - ARP packets plus the spoof and restore replies
//! - [`dns`] - DNS message decoding into lookup events
//! - [`builder`] - fluent builder used to synthesize frames
//! - [`checksum`] - Internet checksum helpers
//!
//! # Parsing a captured frame
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use lanwatch_core::MacAddr;
//! use lanwatch_packet::{PacketBuilder, ParsedFrame, Transport};
//!
//! let frame = PacketBuilder::new()
//!     .ethernet(MacAddr::new([0, 1, 2, 3, 4, 5]), MacAddr::broadcast())
//!     .ipv4(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(192, 168, 1, 1))
//!     .udp(40000, 53)
//!     .payload(vec![0u8; 12])
//!     .build()
//!     .unwrap();
//!
//! let parsed = ParsedFrame::parse(&frame).unwrap();
//! assert!(matches!(parsed.transport, Some(Transport::Udp(_))));
//! ```

pub mod arp;
pub mod builder;
pub mod checksum;
pub mod dns;
pub mod ethernet;
pub mod frame;
pub mod ipv4;
pub mod tcp;
pub mod udp;

pub use arp::{ArpOpcode, ArpPacket};
pub use builder::PacketBuilder;
pub use checksum::{internet_checksum, transport_checksum};
pub use dns::{DnsDecoder, DnsLookup};
pub use ethernet::{EtherType, EthernetHeader};
pub use frame::{ParsedFrame, Transport};
pub use ipv4::{IpProtocol, Ipv4Header};
pub use tcp::{TcpFlags, TcpHeader};
pub use udp::UdpHeader;
