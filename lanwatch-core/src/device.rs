//! Device records and references

use crate::MacAddr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// A physical device on the local segment, keyed by hardware address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Canonical hardware address (unique key)
    pub mac: MacAddr,
    /// Most recent IP address seen with this hardware address
    pub last_known_ip: IpAddr,
    /// When the device was first observed
    pub first_seen: DateTime<Utc>,
    /// When the device was last observed
    pub last_seen: DateTime<Utc>,
    /// Optional hostname
    pub hostname: Option<String>,
}

impl Device {
    /// Create a device observed for the first time at `now`
    pub fn new(mac: MacAddr, ip: IpAddr, now: DateTime<Utc>) -> Self {
        Self {
            mac,
            last_known_ip: ip,
            first_seen: now,
            last_seen: now,
            hostname: None,
        }
    }

    /// Non-owning reference to this device
    pub fn reference(&self) -> DeviceRef {
        DeviceRef::Known(self.mac)
    }
}

/// Foreign-key style reference from an event to its originating device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceRef {
    /// Device identified by its hardware address
    Known(MacAddr),
    /// Originating IP could not be tied to a known device
    Unknown,
}

impl DeviceRef {
    pub fn mac(&self) -> Option<MacAddr> {
        match self {
            DeviceRef::Known(mac) => Some(*mac),
            DeviceRef::Unknown => None,
        }
    }
}

impl From<MacAddr> for DeviceRef {
    fn from(mac: MacAddr) -> Self {
        DeviceRef::Known(mac)
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Known(mac) => write!(f, "{}", mac),
            DeviceRef::Unknown => write!(f, "unknown"),
        }
    }
}
