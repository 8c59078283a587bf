//! Decode stage between the capture thread and the store
//!
//! Each frame is handled synchronously: parse, attribute to the sending
//! device, check the filter, then decode DNS or TCP SYNs into events.
//! Every failure on this path is counted and logged, never fatal.

use crate::connection::ConnectionTracker;
use crate::filter::DeviceFilter;
use crate::is_local_ipv4;
use crate::registry::{DeviceRegistry, Observation};
use crate::store::ActivityStore;
use chrono::{DateTime, Duration, Utc};
use lanwatch_core::{ports, ActivityEvent, DeviceRef, MacAddr, Packet};
use lanwatch_packet::{ArpPacket, DnsDecoder, ParsedFrame, Transport};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, trace, warn};

/// How often an unchanged device row is refreshed in the store
const PERSIST_INTERVAL_SECS: i64 = 60;

/// How long `run` waits on the channel before checking for shutdown
const POLL_INTERVAL: StdDuration = StdDuration::from_millis(200);

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    malformed: AtomicU64,
    ignored: AtomicU64,
    filtered: AtomicU64,
    events: AtomicU64,
    dns_failures: AtomicU64,
    store_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    /// Frames too short for their own headers
    pub malformed: u64,
    /// Our own frames, remote sources, and non-unicast senders
    pub ignored: u64,
    /// Frames from devices the filter does not admit
    pub filtered: u64,
    /// Events written to the store
    pub events: u64,
    pub dns_failures: u64,
    pub store_errors: u64,
}

/// Frame-to-event pipeline
pub struct Pipeline {
    registry: Arc<DeviceRegistry>,
    filter: Arc<DeviceFilter>,
    store: Arc<ActivityStore>,
    dns: DnsDecoder,
    tracker: ConnectionTracker,
    ignore: HashSet<MacAddr>,
    local_only: bool,
    persisted: Mutex<HashMap<MacAddr, DateTime<Utc>>>,
    counters: Counters,
}

impl Pipeline {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        filter: Arc<DeviceFilter>,
        store: Arc<ActivityStore>,
    ) -> Self {
        Self {
            registry,
            filter,
            store,
            dns: DnsDecoder::new(),
            tracker: ConnectionTracker::new(),
            ignore: HashSet::new(),
            local_only: true,
            persisted: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_tracker(mut self, tracker: ConnectionTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Skip frames sent by `mac`.
    ///
    /// While spoofing, this host forwards the targets' traffic with its
    /// own address as the Ethernet source; without this, that traffic
    /// would be attributed to us.
    pub fn ignore_source(mut self, mac: MacAddr) -> Self {
        self.ignore.insert(mac);
        self
    }

    /// Attribute IPv4 traffic only when the source address is local.
    ///
    /// Routed traffic arrives with the gateway's hardware address, so a
    /// remote source would otherwise be pinned on the gateway.
    pub fn local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            frames: c.frames.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            ignored: c.ignored.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
            events: c.events.load(Ordering::Relaxed),
            dns_failures: c.dns_failures.load(Ordering::Relaxed),
            store_errors: c.store_errors.load(Ordering::Relaxed),
        }
    }

    /// Handle one frame, returning how many events were stored
    pub fn process_frame(&self, data: &[u8], timestamp: DateTime<Utc>) -> usize {
        bump(&self.counters.frames);

        let frame = match ParsedFrame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                bump(&self.counters.malformed);
                trace!(error = %e, len = data.len(), "Dropping malformed frame");
                return 0;
            }
        };

        let source = frame.ethernet.source;
        if self.ignore.contains(&source) || !source.is_unicast() {
            bump(&self.counters.ignored);
            return 0;
        }

        if let Some(arp) = frame.arp() {
            self.observe_arp(arp, timestamp);
            return 0;
        }

        let Some(ip) = frame.ipv4() else {
            return 0;
        };
        if self.local_only && !is_local_ipv4(ip.source) {
            bump(&self.counters.ignored);
            return 0;
        }

        let observation = self.registry.observe_mac(source, IpAddr::V4(ip.source), timestamp);
        if !self.filter.is_admitted_mac(&source) {
            bump(&self.counters.filtered);
            return 0;
        }
        self.persist_device(&observation, timestamp);

        let device = observation.reference();
        let events = match frame.transport {
            Some(Transport::Udp(udp)) if udp.involves_port(ports::DNS) => {
                self.decode_dns(device, ip.source, frame.payload, timestamp)
            }
            Some(Transport::Tcp(tcp)) => self
                .tracker
                .observe(device, ip.source, ip.destination, &tcp, timestamp)
                .map(|e| vec![ActivityEvent::Connection(e)])
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        self.store_events(&events)
    }

    /// ARP senders keep `last_known_ip` fresh for quiet devices
    fn observe_arp(&self, arp: &ArpPacket, timestamp: DateTime<Utc>) {
        let mac = arp.sender_hw_addr;
        let ip = arp.sender_proto_addr;
        if ip.is_unspecified() || !mac.is_unicast() || self.ignore.contains(&mac) {
            return;
        }

        let observation = self.registry.observe_mac(mac, IpAddr::V4(ip), timestamp);
        if self.filter.is_admitted_mac(&mac) {
            self.persist_device(&observation, timestamp);
        }
    }

    fn decode_dns(
        &self,
        device: DeviceRef,
        source: Ipv4Addr,
        payload: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Vec<ActivityEvent> {
        match self.dns.decode(payload) {
            Ok(lookups) => lookups
                .into_iter()
                .map(|l| ActivityEvent::Dns(l.into_event(device, IpAddr::V4(source), timestamp)))
                .collect(),
            Err(e) => {
                let failures = bump(&self.counters.dns_failures);
                debug!(error = %e, source = %source, failures, "DNS decode failed");
                Vec::new()
            }
        }
    }

    fn store_events(&self, events: &[ActivityEvent]) -> usize {
        let mut stored = 0;
        for event in events {
            match self.store.append(event) {
                Ok(_) => {
                    stored += 1;
                    bump(&self.counters.events);
                    trace!(kind = event.kind(), device = %event.device(), "Stored event");
                }
                Err(e) => {
                    bump(&self.counters.store_errors);
                    warn!(kind = event.kind(), error = %e, "Failed to store event");
                }
            }
        }
        stored
    }

    /// Upsert new devices, moved devices, and stale rows
    fn persist_device(&self, observation: &Observation, now: DateTime<Utc>) {
        let mac = observation.device.mac;
        let due = {
            let persisted = self.persisted.lock();
            observation.is_new
                || observation.ip_changed
                || persisted
                    .get(&mac)
                    .map_or(true, |last| now - *last >= Duration::seconds(PERSIST_INTERVAL_SECS))
        };
        if !due {
            return;
        }

        match self.store.upsert_device(&observation.device) {
            Ok(()) => {
                self.persisted.lock().insert(mac, now);
            }
            Err(e) => {
                bump(&self.counters.store_errors);
                warn!(mac = %mac, error = %e, "Failed to persist device");
            }
        }
    }

    /// Drain `rx` until the sender hangs up or `shutdown` is set
    pub fn run(&self, rx: Receiver<Packet>, shutdown: &AtomicBool) -> PipelineStats {
        info!("Decode pipeline started");

        while !shutdown.load(Ordering::Relaxed) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(packet) => {
                    self.process_frame(packet.data(), packet.timestamp);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Capture channel closed");
                    break;
                }
            }
        }

        let stats = self.stats();
        info!(
            frames = stats.frames,
            events = stats.events,
            malformed = stats.malformed,
            filtered = stats.filtered,
            dns_failures = stats.dns_failures,
            store_errors = stats.store_errors,
            "Decode pipeline stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::DeviceFilterConfig;
    use crate::store::Table;
    use lanwatch_packet::{PacketBuilder, TcpFlags};
    use std::sync::mpsc::sync_channel;
    use std::thread;

    const DEVICE: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    const ROUTER: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const DEVICE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const RESOLVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

    fn dns_response(name: &str) -> Vec<u8> {
        let mut buf = vec![0xbe, 0xef, 0x81, 0x80, 0, 1, 0, 1, 0, 0, 0, 0];
        for label in name.trim_end_matches('.').split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&[0, 1, 0, 1]);
        buf.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0x0e, 0x10, 0, 4, 142, 250, 80, 14]);
        buf
    }

    fn dns_frame(src: MacAddr, src_ip: Ipv4Addr, payload: Vec<u8>) -> Vec<u8> {
        PacketBuilder::new()
            .ethernet(src, ROUTER)
            .ipv4(src_ip, RESOLVER_IP)
            .udp(53000, 53)
            .payload(payload)
            .build()
            .unwrap()
    }

    fn syn_frame(src: MacAddr, src_ip: Ipv4Addr, port: u16) -> Vec<u8> {
        PacketBuilder::new()
            .ethernet(src, ROUTER)
            .ipv4(src_ip, Ipv4Addr::new(93, 184, 216, 34))
            .tcp(51000, port, 1000, 0, TcpFlags::SYN)
            .build()
            .unwrap()
    }

    fn pipeline(config: DeviceFilterConfig) -> (Pipeline, Arc<ActivityStore>) {
        let store = Arc::new(ActivityStore::open_in_memory().unwrap());
        let pipeline = Pipeline::new(
            Arc::new(DeviceRegistry::new()),
            Arc::new(DeviceFilter::in_memory(config)),
            store.clone(),
        );
        (pipeline, store)
    }

    #[test]
    fn test_dns_response_with_filtering_disabled() {
        let (pipeline, store) = pipeline(DeviceFilterConfig::default());
        let frame = dns_frame(DEVICE, DEVICE_IP, dns_response("youtube.com."));

        assert_eq!(pipeline.process_frame(&frame, Utc::now()), 1);

        let dns = store.recent_dns_queries(10).unwrap();
        assert_eq!(dns.len(), 1);
        assert_eq!(dns[0].queried_name, "youtube.com");
        assert_eq!(dns[0].device.to_string(), "AA:BB:CC:DD:EE:FF");

        let device = store.device(&DEVICE).unwrap().unwrap();
        assert_eq!(device.last_known_ip, IpAddr::V4(DEVICE_IP));
    }

    #[test]
    fn test_dns_response_from_uninterested_device() {
        let config = DeviceFilterConfig {
            monitor_all: false,
            interested: [MacAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])].into_iter().collect(),
            description: String::new(),
        };
        let (pipeline, store) = pipeline(config);
        let frame = dns_frame(DEVICE, DEVICE_IP, dns_response("youtube.com."));

        assert_eq!(pipeline.process_frame(&frame, Utc::now()), 0);
        for table in Table::ALL {
            assert_eq!(store.count(table).unwrap(), 0, "{}", table.name());
        }
        assert_eq!(pipeline.stats().filtered, 1);
    }

    #[test]
    fn test_duplicate_syn_stored_twice() {
        let (pipeline, store) = pipeline(DeviceFilterConfig::default());
        let frame = syn_frame(DEVICE, DEVICE_IP, 443);

        pipeline.process_frame(&frame, Utc::now());
        pipeline.process_frame(&frame, Utc::now());

        assert_eq!(store.count(Table::Connections).unwrap(), 2);
        assert_eq!(store.count(Table::Devices).unwrap(), 1);
    }

    #[test]
    fn test_malformed_input_survives() {
        let (pipeline, store) = pipeline(DeviceFilterConfig::default());

        assert_eq!(pipeline.process_frame(&[0u8; 6], Utc::now()), 0);
        let garbage_dns = dns_frame(DEVICE, DEVICE_IP, vec![0xff; 5]);
        assert_eq!(pipeline.process_frame(&garbage_dns, Utc::now()), 0);

        let stats = pipeline.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.dns_failures, 1);

        // the next good frame still goes through
        pipeline.process_frame(&syn_frame(DEVICE, DEVICE_IP, 80), Utc::now());
        assert_eq!(store.count(Table::Connections).unwrap(), 1);
    }

    #[test]
    fn test_own_and_remote_sources_ignored() {
        let store = Arc::new(ActivityStore::open_in_memory().unwrap());
        let pipeline = Pipeline::new(
            Arc::new(DeviceRegistry::new()),
            Arc::new(DeviceFilter::in_memory(DeviceFilterConfig::default())),
            store.clone(),
        )
        .ignore_source(ROUTER);

        pipeline.process_frame(&syn_frame(ROUTER, Ipv4Addr::new(192, 168, 1, 1), 443), Utc::now());
        pipeline.process_frame(&syn_frame(DEVICE, Ipv4Addr::new(8, 8, 8, 8), 443), Utc::now());

        assert_eq!(store.count(Table::Connections).unwrap(), 0);
        assert_eq!(pipeline.stats().ignored, 2);
    }

    #[test]
    fn test_arp_updates_registry() {
        let registry = Arc::new(DeviceRegistry::new());
        let store = Arc::new(ActivityStore::open_in_memory().unwrap());
        let pipeline = Pipeline::new(
            registry.clone(),
            Arc::new(DeviceFilter::in_memory(DeviceFilterConfig::default())),
            store.clone(),
        );

        let announce = ArpPacket::new_request(DEVICE, DEVICE_IP, RESOLVER_IP).to_frame();
        let probe = ArpPacket::new_request(ROUTER, Ipv4Addr::UNSPECIFIED, DEVICE_IP).to_frame();
        pipeline.process_frame(&announce, Utc::now());
        pipeline.process_frame(&probe, Utc::now());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&DEVICE).unwrap().last_known_ip, IpAddr::V4(DEVICE_IP));
        assert_eq!(store.count(Table::Devices).unwrap(), 1);
    }

    #[test]
    fn test_device_row_refreshed_on_ip_change_only() {
        let (pipeline, store) = pipeline(DeviceFilterConfig::default());
        let t0 = Utc::now();

        pipeline.process_frame(&syn_frame(DEVICE, DEVICE_IP, 443), t0);
        pipeline.process_frame(
            &syn_frame(DEVICE, DEVICE_IP, 443),
            t0 + Duration::seconds(5),
        );
        assert_eq!(store.device(&DEVICE).unwrap().unwrap().last_seen, t0);

        let moved = Ipv4Addr::new(192, 168, 1, 77);
        pipeline.process_frame(&syn_frame(DEVICE, moved, 443), t0 + Duration::seconds(6));
        assert_eq!(
            store.device(&DEVICE).unwrap().unwrap().last_known_ip,
            IpAddr::V4(moved)
        );
    }

    #[test]
    fn test_run_drains_until_disconnect() {
        let (pipeline, store) = pipeline(DeviceFilterConfig::default());
        let (tx, rx) = sync_channel(8);
        let shutdown = AtomicBool::new(false);

        let producer = thread::spawn(move || {
            for _ in 0..3 {
                let frame = syn_frame(DEVICE, DEVICE_IP, 443);
                tx.send(Packet::new("test0".into(), frame)).unwrap();
            }
        });

        let stats = pipeline.run(rx, &shutdown);
        producer.join().unwrap();

        assert_eq!(stats.frames, 3);
        assert_eq!(stats.events, 3);
        assert_eq!(store.count(Table::Connections).unwrap(), 3);
    }
}
