//! TCP connection attempt tracking

use crate::is_local_ipv4;
use chrono::{DateTime, Utc};
use lanwatch_core::{ports, ConnectionEvent, DeviceRef, ProtocolGuess};
use lanwatch_packet::TcpHeader;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

/// Turns SYN segments to watched ports into [`ConnectionEvent`]s.
///
/// Every qualifying SYN yields an event, retransmissions included.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    watched_ports: BTreeSet<u16>,
    local_only: bool,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self {
            watched_ports: [ports::HTTP, ports::HTTPS].into_iter().collect(),
            local_only: true,
        }
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the watched destination ports
    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.watched_ports = ports.into_iter().collect();
        self
    }

    /// Only count SYNs from private or link-local sources
    pub fn local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    pub fn watched_ports(&self) -> Vec<u16> {
        self.watched_ports.iter().copied().collect()
    }

    /// Classify one TCP segment
    pub fn observe(
        &self,
        device: DeviceRef,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        tcp: &TcpHeader,
        timestamp: DateTime<Utc>,
    ) -> Option<ConnectionEvent> {
        if !tcp.flags.is_connection_attempt() {
            return None;
        }
        if !self.watched_ports.contains(&tcp.destination_port) {
            return None;
        }
        if self.local_only && !is_local_ipv4(source) {
            return None;
        }

        // Ports outside the well-known pairs are treated as plain HTTP
        let protocol_guess =
            ProtocolGuess::from_port(tcp.destination_port).unwrap_or(ProtocolGuess::Http);

        Some(ConnectionEvent {
            device,
            source_ip: IpAddr::V4(source),
            destination_ip: IpAddr::V4(destination),
            destination_port: tcp.destination_port,
            protocol_guess,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanwatch_core::MacAddr;
    use lanwatch_packet::TcpFlags;

    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const REMOTE: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

    fn segment(port: u16, flags: TcpFlags) -> TcpHeader {
        TcpHeader {
            source_port: 51515,
            destination_port: port,
            sequence: 1,
            acknowledgment: 0,
            header_len: 20,
            flags,
            window: 64240,
        }
    }

    fn device() -> DeviceRef {
        DeviceRef::Known(MacAddr::new([2, 0, 0, 0, 0, 1]))
    }

    #[test]
    fn test_syn_to_watched_ports() {
        let tracker = ConnectionTracker::new();
        let now = Utc::now();

        let https = tracker
            .observe(device(), LOCAL, REMOTE, &segment(443, TcpFlags::SYN), now)
            .unwrap();
        assert_eq!(https.protocol_guess, ProtocolGuess::Https);
        assert_eq!(https.destination_ip, IpAddr::V4(REMOTE));
        assert_eq!(https.destination_port, 443);

        let http = tracker
            .observe(device(), LOCAL, REMOTE, &segment(80, TcpFlags::SYN), now)
            .unwrap();
        assert_eq!(http.protocol_guess, ProtocolGuess::Http);
    }

    #[test]
    fn test_ignores_other_segments() {
        let tracker = ConnectionTracker::new();
        let now = Utc::now();
        assert!(tracker
            .observe(device(), LOCAL, REMOTE, &segment(22, TcpFlags::SYN), now)
            .is_none());
        assert!(tracker
            .observe(device(), LOCAL, REMOTE, &segment(443, TcpFlags::SYN_ACK), now)
            .is_none());
        assert!(tracker
            .observe(device(), LOCAL, REMOTE, &segment(443, TcpFlags::ACK), now)
            .is_none());
    }

    #[test]
    fn test_local_only() {
        let now = Utc::now();
        let inbound = ConnectionTracker::new().observe(
            device(),
            REMOTE,
            LOCAL,
            &segment(443, TcpFlags::SYN),
            now,
        );
        assert!(inbound.is_none());

        let permissive = ConnectionTracker::new().local_only(false);
        assert!(permissive
            .observe(device(), REMOTE, LOCAL, &segment(443, TcpFlags::SYN), now)
            .is_some());
    }

    #[test]
    fn test_retransmitted_syn_is_not_deduplicated() {
        let tracker = ConnectionTracker::new();
        let now = Utc::now();
        let syn = segment(443, TcpFlags::SYN);
        let a = tracker.observe(device(), LOCAL, REMOTE, &syn, now);
        let b = tracker.observe(device(), LOCAL, REMOTE, &syn, now);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_custom_ports() {
        let tracker = ConnectionTracker::new().with_ports([8443, 8000]);
        assert_eq!(tracker.watched_ports(), vec![8000, 8443]);
        let event = tracker
            .observe(device(), LOCAL, REMOTE, &segment(8443, TcpFlags::SYN), Utc::now())
            .unwrap();
        assert_eq!(event.protocol_guess, ProtocolGuess::Https);
        assert!(tracker
            .observe(device(), LOCAL, REMOTE, &segment(443, TcpFlags::SYN), Utc::now())
            .is_none());
    }
}
