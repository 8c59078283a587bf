//! Live device registry keyed by hardware address

use chrono::{DateTime, Utc};
use lanwatch_core::{Device, DeviceRef, MacAddr};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, info};

/// Result of recording one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Device state after the update
    pub device: Device,
    /// First time this hardware address was seen
    pub is_new: bool,
    /// The address moved to a different IP
    pub ip_changed: bool,
}

impl Observation {
    pub fn reference(&self) -> DeviceRef {
        self.device.reference()
    }
}

/// In-memory owner of live [`Device`] records.
///
/// One mutex guards the whole map, so an upsert of a given device is
/// atomic with respect to every other observer.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<MacAddr, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `hardware_address` was seen using `ip`.
    ///
    /// The address is canonicalized first. A malformed address is dropped
    /// and `None` returned; this never fails otherwise.
    pub fn observe(&self, hardware_address: &str, ip: IpAddr) -> Option<DeviceRef> {
        match hardware_address.parse::<MacAddr>() {
            Ok(mac) => Some(self.observe_mac(mac, ip, Utc::now()).reference()),
            Err(_) => {
                debug!(address = hardware_address, "Dropping observation with malformed address");
                None
            }
        }
    }

    /// Record an observation for an already parsed address at time `now`
    pub fn observe_mac(&self, mac: MacAddr, ip: IpAddr, now: DateTime<Utc>) -> Observation {
        let mut devices = self.devices.lock();

        match devices.get_mut(&mac) {
            Some(device) => {
                let ip_changed = device.last_known_ip != ip;
                if ip_changed {
                    info!(
                        mac = %mac,
                        old_ip = %device.last_known_ip,
                        new_ip = %ip,
                        "Device changed address"
                    );
                    device.last_known_ip = ip;
                }
                if now > device.last_seen {
                    device.last_seen = now;
                }
                Observation {
                    device: device.clone(),
                    is_new: false,
                    ip_changed,
                }
            }
            None => {
                info!(mac = %mac, ip = %ip, "New device");
                let device = Device::new(mac, ip, now);
                devices.insert(mac, device.clone());
                Observation {
                    device,
                    is_new: true,
                    ip_changed: false,
                }
            }
        }
    }

    pub fn get(&self, mac: &MacAddr) -> Option<Device> {
        self.devices.lock().get(mac).cloned()
    }

    /// Most recently seen device currently using `ip`
    pub fn lookup_ip(&self, ip: IpAddr) -> Option<Device> {
        self.devices
            .lock()
            .values()
            .filter(|d| d.last_known_ip == ip)
            .max_by_key(|d| d.last_seen)
            .cloned()
    }

    /// Seed the registry with devices known from earlier runs.
    ///
    /// Entries already present keep their live state.
    pub fn preload(&self, devices: impl IntoIterator<Item = Device>) -> usize {
        let mut map = self.devices.lock();
        let mut added = 0;
        for device in devices {
            if let std::collections::hash_map::Entry::Vacant(slot) = map.entry(device.mac) {
                slot.insert(device);
                added += 1;
            }
        }
        debug!(added, "Preloaded devices");
        added
    }

    pub fn set_hostname(&self, mac: &MacAddr, hostname: Option<String>) -> bool {
        match self.devices.lock().get_mut(mac) {
            Some(device) => {
                device.hostname = hostname;
                true
            }
            None => false,
        }
    }

    /// Copy of every device
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.lock().values().cloned().collect();
        devices.sort_by_key(|d| d.mac);
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }
}
