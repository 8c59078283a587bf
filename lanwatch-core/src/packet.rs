//! Captured frame container

use chrono::{DateTime, Utc};

/// A link-layer frame as delivered by the capture layer
#[derive(Debug, Clone)]
pub struct Packet {
    /// When the frame was captured
    pub timestamp: DateTime<Utc>,
    /// Interface the frame was received on
    pub interface: String,
    /// Frame bytes, starting at the Ethernet header
    pub data: Vec<u8>,
    /// Original length on the wire (may exceed data.len() if truncated)
    pub len: usize,
}

impl Packet {
    /// Create a frame stamped with the current time
    pub fn new(interface: String, data: Vec<u8>) -> Self {
        Self::with_timestamp(interface, data, Utc::now())
    }

    pub fn with_timestamp(interface: String, data: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        let len = data.len();
        Self {
            timestamp,
            interface,
            data,
            len,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
