//! Activity events
//!
//! Every event carries a [`DeviceRef`] to the device it originated from and
//! is immutable once created. Events flow from the decoders and the flow
//! interceptor into the activity store.

use crate::DeviceRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// DNS record type, collapsed to the types the monitor distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Other,
}

impl DnsRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsRecordType::A => "A",
            DnsRecordType::Aaaa => "AAAA",
            DnsRecordType::Cname => "CNAME",
            DnsRecordType::Other => "OTHER",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "A" => DnsRecordType::A,
            "AAAA" => DnsRecordType::Aaaa,
            "CNAME" => DnsRecordType::Cname,
            _ => DnsRecordType::Other,
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application protocol guessed from the destination port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolGuess {
    Http,
    Https,
}

impl ProtocolGuess {
    /// Guess by well-known port
    pub fn from_port(port: u16) -> Option<Self> {
        match port {
            80 | 8080 => Some(ProtocolGuess::Http),
            443 | 8443 => Some(ProtocolGuess::Https),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolGuess::Http => "http",
            ProtocolGuess::Https => "https",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "http" => Some(ProtocolGuess::Http),
            "https" => Some(ProtocolGuess::Https),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolGuess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search engine a query was sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchEngine {
    Google,
    Bing,
    Yahoo,
    Youtube,
    Other,
}

impl SearchEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchEngine::Google => "GOOGLE",
            SearchEngine::Bing => "BING",
            SearchEngine::Yahoo => "YAHOO",
            SearchEngine::Youtube => "YOUTUBE",
            SearchEngine::Other => "OTHER",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "GOOGLE" => SearchEngine::Google,
            "BING" => SearchEngine::Bing,
            "YAHOO" => SearchEngine::Yahoo,
            "YOUTUBE" => SearchEngine::Youtube,
            _ => SearchEngine::Other,
        }
    }
}

impl fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DNS name looked up by a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQueryEvent {
    pub device: DeviceRef,
    pub source_ip: IpAddr,
    /// Lowercased, without the trailing root dot
    pub queried_name: String,
    pub record_type: DnsRecordType,
    pub timestamp: DateTime<Utc>,
}

/// A TCP connection attempt (SYN) to a watched port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub device: DeviceRef,
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    pub destination_port: u16,
    pub protocol_guess: ProtocolGuess,
    pub timestamp: DateTime<Utc>,
}

/// A search query recovered from a decrypted flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQueryEvent {
    pub device: DeviceRef,
    pub source_ip: IpAddr,
    pub search_engine: SearchEngine,
    pub query_text: String,
    pub timestamp: DateTime<Utc>,
}

/// A page request recovered from a decrypted flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowsingHistoryEvent {
    pub device: DeviceRef,
    pub source_ip: IpAddr,
    pub method: String,
    pub host: String,
    /// Path plus query string, sensitive values already redacted
    pub path: String,
    pub status_code: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

/// A urlencoded form post recovered from a decrypted flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSubmissionEvent {
    pub device: DeviceRef,
    pub source_ip: IpAddr,
    pub host: String,
    pub path: String,
    /// Field name/value pairs, sensitive values already redacted
    pub fields: Vec<(String, String)>,
    pub timestamp: DateTime<Utc>,
}

/// Any event the activity store accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityEvent {
    Dns(DnsQueryEvent),
    Connection(ConnectionEvent),
    Search(SearchQueryEvent),
    Browsing(BrowsingHistoryEvent),
    Form(FormSubmissionEvent),
}

impl ActivityEvent {
    pub fn device(&self) -> DeviceRef {
        match self {
            ActivityEvent::Dns(e) => e.device,
            ActivityEvent::Connection(e) => e.device,
            ActivityEvent::Search(e) => e.device,
            ActivityEvent::Browsing(e) => e.device,
            ActivityEvent::Form(e) => e.device,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ActivityEvent::Dns(e) => e.timestamp,
            ActivityEvent::Connection(e) => e.timestamp,
            ActivityEvent::Search(e) => e.timestamp,
            ActivityEvent::Browsing(e) => e.timestamp,
            ActivityEvent::Form(e) => e.timestamp,
        }
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ActivityEvent::Dns(_) => "dns",
            ActivityEvent::Connection(_) => "connection",
            ActivityEvent::Search(_) => "search",
            ActivityEvent::Browsing(_) => "browsing",
            ActivityEvent::Form(_) => "form",
        }
    }
}

impl From<DnsQueryEvent> for ActivityEvent {
    fn from(e: DnsQueryEvent) -> Self {
        ActivityEvent::Dns(e)
    }
}

impl From<ConnectionEvent> for ActivityEvent {
    fn from(e: ConnectionEvent) -> Self {
        ActivityEvent::Connection(e)
    }
}

impl From<SearchQueryEvent> for ActivityEvent {
    fn from(e: SearchQueryEvent) -> Self {
        ActivityEvent::Search(e)
    }
}

impl From<BrowsingHistoryEvent> for ActivityEvent {
    fn from(e: BrowsingHistoryEvent) -> Self {
        ActivityEvent::Browsing(e)
    }
}

impl From<FormSubmissionEvent> for ActivityEvent {
    fn from(e: FormSubmissionEvent) -> Self {
        ActivityEvent::Form(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_guess_by_port() {
        assert_eq!(ProtocolGuess::from_port(80), Some(ProtocolGuess::Http));
        assert_eq!(ProtocolGuess::from_port(443), Some(ProtocolGuess::Https));
        assert_eq!(ProtocolGuess::from_port(22), None);
    }

    #[test]
    fn test_labels_round_trip() {
        for engine in [
            SearchEngine::Google,
            SearchEngine::Bing,
            SearchEngine::Yahoo,
            SearchEngine::Youtube,
            SearchEngine::Other,
        ] {
            assert_eq!(SearchEngine::from_label(engine.as_str()), engine);
        }
        assert_eq!(DnsRecordType::from_label("AAAA"), DnsRecordType::Aaaa);
        assert_eq!(DnsRecordType::from_label("MX"), DnsRecordType::Other);
    }
}
