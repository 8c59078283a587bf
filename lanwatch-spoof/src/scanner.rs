//! ARP sweep of the local subnet
//!
//! The sweep only sends requests. Replies are seen by the capture
//! pipeline, which learns each responder as a device.

use ipnetwork::Ipv4Network;
use lanwatch_core::{Error, MacAddr, PacketSender, Result};
use lanwatch_packet::arp::request_frame;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Smallest prefix a sweep accepts (1022 hosts)
pub const MIN_PREFIX: u8 = 22;

pub struct ArpScanner {
    sender: Arc<dyn PacketSender>,
    our_mac: MacAddr,
    our_ip: Ipv4Addr,
    pace: Duration,
}

impl ArpScanner {
    pub fn new(sender: Arc<dyn PacketSender>, our_mac: MacAddr, our_ip: Ipv4Addr) -> Self {
        Self {
            sender,
            our_mac,
            our_ip,
            pace: Duration::from_millis(2),
        }
    }

    /// Delay between requests
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Send one who-has for every host address in `network`.
    ///
    /// Returns the number of requests sent. Individual send failures are
    /// logged and skipped.
    pub async fn sweep(&self, network: Ipv4Network) -> Result<usize> {
        if network.prefix() < MIN_PREFIX {
            return Err(Error::config(format!(
                "{} is larger than a /{}; refusing to sweep",
                network, MIN_PREFIX
            )));
        }

        let hosts: Vec<Ipv4Addr> = host_addresses(network)
            .filter(|ip| *ip != self.our_ip)
            .collect();
        info!(network = %network, hosts = hosts.len(), "Starting ARP sweep");

        let mut sent = 0;
        for ip in hosts {
            match self.sender.send(&request_frame(self.our_mac, self.our_ip, ip)) {
                Ok(()) => sent += 1,
                Err(e) => warn!(ip = %ip, error = %e, "ARP request failed"),
            }
            if !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
        }

        debug!(sent, "ARP sweep finished");
        Ok(sent)
    }
}

/// Usable host addresses: network and broadcast excluded below a /31
fn host_addresses(network: Ipv4Network) -> impl Iterator<Item = Ipv4Addr> {
    let (network_addr, broadcast) = (network.network(), network.broadcast());
    let edges = network.prefix() < 31;
    network
        .iter()
        .filter(move |ip| !edges || (*ip != network_addr && *ip != broadcast))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanwatch_core::MemorySender;
    use lanwatch_packet::{ArpPacket, EthernetHeader};

    const US: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);

    fn scanner(sender: Arc<MemorySender>) -> ArpScanner {
        ArpScanner::new(sender, US, Ipv4Addr::new(192, 168, 1, 5)).with_pace(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_sweep_covers_every_host_but_us() {
        let sender = Arc::new(MemorySender::new());
        let sent = scanner(sender.clone())
            .sweep("192.168.1.0/24".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(sent, 253);
        let frames = sender.frames();
        let first = &frames[0];
        let eth = EthernetHeader::parse(first).unwrap();
        assert!(eth.destination.is_broadcast());
        let arp = ArpPacket::parse(&first[eth.payload_offset..]).unwrap();
        assert!(arp.is_request());
        assert_eq!(arp.target_proto_addr, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[tokio::test]
    async fn test_sweep_rejects_large_networks() {
        let sender = Arc::new(MemorySender::new());
        let result = scanner(sender.clone())
            .sweep("10.0.0.0/16".parse().unwrap())
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(sender.count(), 0);
    }

    #[tokio::test]
    async fn test_send_failures_are_skipped() {
        let sender = Arc::new(MemorySender::new());
        sender.set_failing(true);
        let sent = scanner(sender).sweep("192.168.1.0/30".parse().unwrap()).await.unwrap();
        assert_eq!(sent, 0);
    }
}
