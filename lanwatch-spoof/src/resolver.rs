//! Resolving IPv4 addresses to hardware addresses over ARP

use async_trait::async_trait;
use lanwatch_core::{AddressResolver, Error, Interface, MacAddr, Result};
use lanwatch_packet::arp::request_frame;
use lanwatch_packet::{ArpPacket, EtherType, EthernetHeader};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Active ARP resolver bound to one interface.
///
/// Each lookup opens a raw channel, broadcasts a who-has request and waits
/// for the matching reply, retrying a few times. Results are cached for
/// the life of the resolver.
pub struct ArpResolver {
    interface: Interface,
    our_ip: Ipv4Addr,
    attempts: u32,
    timeout: Duration,
    cache: Mutex<HashMap<Ipv4Addr, MacAddr>>,
}

impl ArpResolver {
    pub fn new(interface: Interface) -> Result<Self> {
        let our_ip = interface.ipv4_addr().ok_or_else(|| {
            Error::Interface(format!("{} has no IPv4 address", interface.name))
        })?;
        Ok(Self {
            interface,
            our_ip,
            attempts: 3,
            timeout: Duration::from_secs(1),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn resolve_blocking(
        interface: &Interface,
        our_ip: Ipv4Addr,
        target: Ipv4Addr,
        attempts: u32,
        timeout: Duration,
    ) -> Result<MacAddr> {
        let (mut tx, mut rx) = interface.open_channel(Some(Duration::from_millis(100)))?;
        let request = request_frame(interface.mac_address, our_ip, target);

        for attempt in 1..=attempts {
            trace!(ip = %target, attempt, "Sending who-has");
            if let Some(Err(e)) = tx.send_to(&request, None) {
                return Err(Error::Interface(format!("ARP request send failed: {}", e)));
            }

            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                let frame = match rx.next() {
                    Ok(frame) => frame,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(e.into()),
                };
                if let Some(mac) = reply_from(frame, target) {
                    return Ok(mac);
                }
            }
        }

        Err(Error::Unresolved(target))
    }
}

/// Sender hardware address if `frame` is an ARP reply from `target`
fn reply_from(frame: &[u8], target: Ipv4Addr) -> Option<MacAddr> {
    let eth = EthernetHeader::parse(frame)?;
    if eth.ethertype != EtherType::ARP {
        return None;
    }
    let arp = ArpPacket::parse(&frame[eth.payload_offset..]).ok()?;
    (arp.is_reply() && arp.sender_proto_addr == target).then_some(arp.sender_hw_addr)
}

#[async_trait]
impl AddressResolver for ArpResolver {
    async fn resolve(&self, ip: Ipv4Addr) -> Result<MacAddr> {
        if let Some(mac) = self.cache.lock().get(&ip).copied() {
            return Ok(mac);
        }

        let interface = self.interface.clone();
        let (our_ip, attempts, timeout) = (self.our_ip, self.attempts, self.timeout);
        let mac = tokio::task::spawn_blocking(move || {
            Self::resolve_blocking(&interface, our_ip, ip, attempts, timeout)
        })
        .await
        .map_err(|e| Error::Interface(format!("resolver task failed: {}", e)))??;

        debug!(ip = %ip, mac = %mac, "Resolved");
        self.cache.lock().insert(ip, mac);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanwatch_packet::arp::spoof_reply;

    #[test]
    fn test_reply_from_matches_sender() {
        let owner = MacAddr::new([0x10, 0, 0, 0, 0, 0x20]);
        let us = MacAddr::new([0x02, 0, 0, 0, 0, 0x01]);
        let target = Ipv4Addr::new(192, 168, 1, 20);
        let frame = spoof_reply(owner, target, us, Ipv4Addr::new(192, 168, 1, 5));

        assert_eq!(reply_from(&frame, target), Some(owner));
        assert_eq!(reply_from(&frame, Ipv4Addr::new(192, 168, 1, 21)), None);

        let request = request_frame(owner, target, Ipv4Addr::new(192, 168, 1, 5));
        assert_eq!(reply_from(&request, target), None);
    }
}
