//! Classification of decrypted application flows
//!
//! The TLS interception proxy sits above the link layer, so a flow only
//! carries the client IP. The device is recovered through the registry
//! and filtered exactly like captured frames. A flow from an IP nobody
//! has claimed is still stored, tagged [`DeviceRef::Unknown`].

use crate::filter::DeviceFilter;
use crate::redact::{decode_redacted, redact_query};
use crate::registry::DeviceRegistry;
use crate::store::ActivityStore;
use chrono::{DateTime, Utc};
use lanwatch_core::{
    ActivityEvent, BrowsingHistoryEvent, DeviceRef, FormSubmissionEvent, Result, SearchEngine,
    SearchQueryEvent,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, trace};
use url::form_urlencoded;

/// Search hosts, matched on any dot-separated label, and their query parameter
const SEARCH_ENGINES: &[(&str, SearchEngine, &str)] = &[
    ("google", SearchEngine::Google, "q"),
    ("bing", SearchEngine::Bing, "q"),
    ("yahoo", SearchEngine::Yahoo, "p"),
    ("youtube", SearchEngine::Youtube, "search_query"),
    ("duckduckgo", SearchEngine::Other, "q"),
    ("yandex", SearchEngine::Other, "text"),
    ("baidu", SearchEngine::Other, "wd"),
];

/// One decrypted request, with its response status when one was seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedFlow {
    pub source_ip: IpAddr,
    pub host: String,
    pub method: String,
    /// Request path; may still carry `?query` when `query` is absent
    pub path: String,
    /// Raw query string without the leading `?`
    #[serde(default)]
    pub query: Option<String>,
    /// Raw `application/x-www-form-urlencoded` body
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl DecryptedFlow {
    pub fn new(source_ip: IpAddr, method: &str, host: &str, path: &str) -> Self {
        Self {
            source_ip,
            host: host.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            query: None,
            form: None,
            status: None,
            timestamp: Utc::now(),
        }
    }

    /// Path without query, and the raw query (possibly empty)
    fn split_target(&self) -> (&str, &str) {
        match &self.query {
            Some(query) => (
                self.path.split('?').next().unwrap_or_default(),
                query.trim_start_matches('?'),
            ),
            None => self.path.split_once('?').unwrap_or((self.path.as_str(), "")),
        }
    }

    /// Lowercased host without any `:port` suffix
    fn host_name(&self) -> String {
        let host = self.host.trim().trim_end_matches('.');
        let host = match host.rsplit_once(':') {
            Some((name, port))
                if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) =>
            {
                name
            }
            _ => host,
        };
        host.to_ascii_lowercase()
    }
}

/// Search engine for `host` and the parameter carrying its query
fn search_engine(host: &str) -> Option<(SearchEngine, &'static str)> {
    SEARCH_ENGINES
        .iter()
        .find(|(label, _, _)| host.split('.').any(|l| l == *label))
        .map(|(_, engine, param)| (*engine, *param))
}

/// Percent-decoded, non-blank value of `param` in a raw query string
fn query_param(query: &str, param: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == param)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Turns decrypted flows into stored activity events
pub struct FlowInterceptor {
    registry: Arc<DeviceRegistry>,
    filter: Arc<DeviceFilter>,
    store: Arc<ActivityStore>,
}

impl FlowInterceptor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        filter: Arc<DeviceFilter>,
        store: Arc<ActivityStore>,
    ) -> Self {
        Self {
            registry,
            filter,
            store,
        }
    }

    /// Classify, redact and persist one flow.
    ///
    /// Returns the events written, empty when the device is filtered out.
    /// Safe to call from many connection tasks at once.
    pub fn handle(&self, flow: &DecryptedFlow) -> Result<Vec<ActivityEvent>> {
        let device = self
            .registry
            .lookup_ip(flow.source_ip)
            .map(|d| d.reference())
            .unwrap_or(DeviceRef::Unknown);

        if let DeviceRef::Known(mac) = device {
            if !self.filter.is_admitted_mac(&mac) {
                trace!(mac = %mac, host = %flow.host, "Flow from filtered device");
                return Ok(Vec::new());
            }
        } else {
            debug!(source_ip = %flow.source_ip, "Flow from unknown device");
        }

        let events = self.classify(flow, device);
        for event in &events {
            self.store.append(event)?;
        }
        Ok(events)
    }

    /// Build the events for `flow` without storing them
    pub fn classify(&self, flow: &DecryptedFlow, device: DeviceRef) -> Vec<ActivityEvent> {
        let host = flow.host_name();
        let (path, query) = flow.split_target();
        let method = flow.method.to_ascii_uppercase();
        let mut events = Vec::new();

        let search = search_engine(&host)
            .and_then(|(engine, param)| query_param(query, param).map(|text| (engine, text)));

        match search {
            Some((search_engine, query_text)) => {
                debug!(engine = %search_engine, "Search query");
                events.push(ActivityEvent::Search(SearchQueryEvent {
                    device,
                    source_ip: flow.source_ip,
                    search_engine,
                    query_text,
                    timestamp: flow.timestamp,
                }));
            }
            None => {
                let full_path = if query.is_empty() {
                    path.to_string()
                } else {
                    format!("{}?{}", path, redact_query(query))
                };
                events.push(ActivityEvent::Browsing(BrowsingHistoryEvent {
                    device,
                    source_ip: flow.source_ip,
                    method: method.clone(),
                    host: host.clone(),
                    path: full_path,
                    status_code: flow.status,
                    timestamp: flow.timestamp,
                }));
            }
        }

        if method == "POST" {
            if let Some(form) = flow.form.as_deref().filter(|f| !f.trim().is_empty()) {
                events.push(ActivityEvent::Form(FormSubmissionEvent {
                    device,
                    source_ip: flow.source_ip,
                    host,
                    path: path.to_string(),
                    fields: decode_redacted(form),
                    timestamp: flow.timestamp,
                }));
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::DeviceFilterConfig;
    use crate::redact::REDACTED;
    use crate::store::Table;
    use lanwatch_core::MacAddr;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn setup(config: DeviceFilterConfig) -> (FlowInterceptor, Arc<ActivityStore>) {
        let registry = Arc::new(DeviceRegistry::new());
        registry.observe(MAC, ip("192.168.1.10"));
        let store = Arc::new(ActivityStore::open_in_memory().unwrap());
        let filter = Arc::new(DeviceFilter::in_memory(config));
        (
            FlowInterceptor::new(registry, filter, store.clone()),
            store,
        )
    }

    fn monitor_all() -> (FlowInterceptor, Arc<ActivityStore>) {
        setup(DeviceFilterConfig::default())
    }

    #[test]
    fn test_google_search() {
        let (interceptor, store) = monitor_all();
        let flow = DecryptedFlow::new(
            ip("192.168.1.10"),
            "GET",
            "www.google.com",
            "/search?q=rust+borrow%20checker&hl=en",
        );

        let events = interceptor.handle(&flow).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ActivityEvent::Search(e) => {
                assert_eq!(e.search_engine, SearchEngine::Google);
                assert_eq!(e.query_text, "rust borrow checker");
                assert_eq!(e.device, DeviceRef::Known(MAC.parse().unwrap()));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(store.count(Table::SearchQueries).unwrap(), 1);
        assert_eq!(store.count(Table::BrowsingHistory).unwrap(), 0);
    }

    #[test]
    fn test_engine_table() {
        let (interceptor, _) = monitor_all();
        let cases = [
            ("www.bing.com", "/search?q=weather", SearchEngine::Bing),
            ("search.yahoo.com", "/search?p=news", SearchEngine::Yahoo),
            ("www.youtube.com:443", "/results?search_query=cats", SearchEngine::Youtube),
            ("duckduckgo.com", "/?q=privacy", SearchEngine::Other),
            ("yandex.ru", "/search/?text=maps", SearchEngine::Other),
            ("www.baidu.com", "/s?wd=hello", SearchEngine::Other),
        ];
        for (host, path, engine) in cases {
            let flow = DecryptedFlow::new(ip("192.168.1.10"), "GET", host, path);
            match &interceptor.classify(&flow, DeviceRef::Unknown)[0] {
                ActivityEvent::Search(e) => assert_eq!(e.search_engine, engine, "{}", host),
                other => panic!("{} gave {:?}", host, other),
            }
        }
    }

    #[test]
    fn test_empty_query_falls_through_to_browsing() {
        let (interceptor, _) = monitor_all();
        let flow = DecryptedFlow::new(ip("192.168.1.10"), "GET", "www.google.com", "/search?q=");
        let events = interceptor.classify(&flow, DeviceRef::Unknown);
        assert!(matches!(events[0], ActivityEvent::Browsing(_)));

        // a label that merely contains an engine name is not that engine
        let flow = DecryptedFlow::new(ip("192.168.1.10"), "GET", "notgoogle.example", "/?q=x");
        let events = interceptor.classify(&flow, DeviceRef::Unknown);
        assert!(matches!(events[0], ActivityEvent::Browsing(_)));
    }

    #[test]
    fn test_browsing_redacts_query() {
        let (interceptor, store) = monitor_all();
        let mut flow = DecryptedFlow::new(ip("192.168.1.10"), "get", "Example.COM", "/account");
        flow.query = Some("query=shoes&PWD=abc&session_token=xyz".into());
        flow.status = Some(302);

        let events = interceptor.handle(&flow).unwrap();
        match &events[0] {
            ActivityEvent::Browsing(e) => {
                assert_eq!(e.method, "GET");
                assert_eq!(e.host, "example.com");
                assert_eq!(
                    e.path,
                    format!("/account?query=shoes&PWD={}&session_token={}", REDACTED, REDACTED)
                );
                assert_eq!(e.status_code, Some(302));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(store.recent_browsing(1).unwrap()[0].status_code, Some(302));
    }

    #[test]
    fn test_post_form_is_redacted() {
        let (interceptor, store) = monitor_all();
        let mut flow = DecryptedFlow::new(ip("192.168.1.10"), "POST", "example.com", "/login");
        flow.form = Some("user=alice&password=hunter2&query=kept".into());

        let events = interceptor.handle(&flow).unwrap();
        assert_eq!(events.len(), 2);
        let form = store.recent_form_submissions(1).unwrap().remove(0);
        assert_eq!(form.path, "/login");
        assert_eq!(
            form.fields,
            vec![
                ("user".to_string(), "alice".to_string()),
                ("password".to_string(), REDACTED.to_string()),
                ("query".to_string(), "kept".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_source_is_kept() {
        let (interceptor, store) = monitor_all();
        let flow = DecryptedFlow::new(ip("192.168.1.99"), "GET", "example.com", "/");
        let events = interceptor.handle(&flow).unwrap();
        assert_eq!(events[0].device(), DeviceRef::Unknown);
        assert_eq!(store.recent_browsing(1).unwrap()[0].device, DeviceRef::Unknown);
    }

    #[test]
    fn test_filtered_device_dropped() {
        let mut config = DeviceFilterConfig::default();
        config.monitor_all = false;
        config.interested.insert(MacAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));
        let (interceptor, store) = setup(config);

        let flow =
            DecryptedFlow::new(ip("192.168.1.10"), "GET", "www.google.com", "/search?q=secret+plans");
        assert!(interceptor.handle(&flow).unwrap().is_empty());
        assert_eq!(store.count(Table::SearchQueries).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_flows_and_frames() {
        use crate::pipeline::Pipeline;
        use lanwatch_packet::{PacketBuilder, TcpFlags};
        use std::net::Ipv4Addr;
        use std::sync::Barrier;
        use std::thread;

        const WORKERS: usize = 4;
        const ROUNDS: usize = 25;
        let phone = MacAddr::new([0x10, 0, 0, 0, 0, 0x01]);
        let laptop = MacAddr::new([0x10, 0, 0, 0, 0, 0x02]);
        let router = MacAddr::new([0x02, 0, 0, 0, 0, 0xfe]);
        let phone_ip = Ipv4Addr::new(192, 168, 1, 20);
        let laptop_ip = Ipv4Addr::new(192, 168, 1, 21);

        let registry = Arc::new(DeviceRegistry::new());
        registry.observe_mac(phone, IpAddr::V4(phone_ip), Utc::now());
        registry.observe_mac(laptop, IpAddr::V4(laptop_ip), Utc::now());
        let mut config = DeviceFilterConfig::default();
        config.monitor_all = false;
        config.interested.insert(phone);
        let filter = Arc::new(DeviceFilter::in_memory(config));
        let store = Arc::new(ActivityStore::open_in_memory().unwrap());

        let interceptor = FlowInterceptor::new(registry.clone(), filter.clone(), store.clone());
        let pipeline = Pipeline::new(registry, filter.clone(), store.clone());

        let syn = |mac: MacAddr, src: Ipv4Addr| {
            PacketBuilder::new()
                .ethernet(mac, router)
                .ipv4(src, Ipv4Addr::new(93, 184, 216, 34))
                .tcp(51000, 443, 1, 0, TcpFlags::SYN)
                .build()
                .unwrap()
        };
        let frames = [syn(phone, phone_ip), syn(laptop, laptop_ip)];
        let flows = [
            DecryptedFlow::new(IpAddr::V4(phone_ip), "GET", "example.com", "/"),
            DecryptedFlow::new(IpAddr::V4(laptop_ip), "GET", "example.com", "/"),
        ];

        // Both devices send in every round; the filter is switched from
        // the phone to the laptop between the two phases.
        let barrier = Barrier::new(2 * WORKERS + 1);
        let run_phase = |frame_worker: bool| {
            for _ in 0..ROUNDS {
                if frame_worker {
                    for frame in &frames {
                        pipeline.process_frame(frame, Utc::now());
                    }
                } else {
                    for flow in &flows {
                        interceptor.handle(flow).unwrap();
                    }
                }
            }
        };
        thread::scope(|scope| {
            for worker in 0..2 * WORKERS {
                let (barrier, run_phase) = (&barrier, &run_phase);
                scope.spawn(move || {
                    run_phase(worker % 2 == 0);
                    barrier.wait();
                    barrier.wait();
                    run_phase(worker % 2 == 0);
                });
            }
            barrier.wait();
            filter.remove(&phone.to_string()).unwrap();
            filter.add(&laptop.to_string()).unwrap();
            barrier.wait();
        });

        let per_phase = WORKERS * ROUNDS;
        assert_eq!(store.count(Table::Connections).unwrap(), 2 * per_phase as u64);
        assert_eq!(store.count(Table::BrowsingHistory).unwrap(), 2 * per_phase as u64);

        let connections = store.recent_connections(10 * per_phase).unwrap();
        let browsing = store.recent_browsing(10 * per_phase).unwrap();
        for mac in [phone, laptop] {
            let device = DeviceRef::Known(mac);
            assert_eq!(connections.iter().filter(|c| c.device == device).count(), per_phase);
            assert_eq!(browsing.iter().filter(|b| b.device == device).count(), per_phase);
        }
        assert_eq!(pipeline.stats().store_errors, 0);
    }

    #[test]
    fn test_flow_json() {
        let flow: DecryptedFlow = serde_json::from_str(
            r#"{"source_ip":"192.168.1.10","host":"example.com","method":"GET","path":"/a?b=c"}"#,
        )
        .unwrap();
        assert_eq!(flow.split_target(), ("/a", "b=c"));
        assert!(flow.status.is_none());
    }
}
