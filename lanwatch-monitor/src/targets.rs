//! Choosing which hosts a redirection session should cover

use crate::filter::DeviceFilterConfig;
use lanwatch_core::{Device, MacAddr};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

/// Outcome of [`select_targets`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSelection {
    pub targets: Vec<Ipv4Addr>,
    /// Interested devices with no known IPv4 address
    pub skipped: Vec<MacAddr>,
    /// Explicit targets that match no interested device
    pub outside_filter: Vec<Ipv4Addr>,
}

impl TargetSelection {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Pick spoof targets.
///
/// Explicit targets win, with a warning for each one the active filter
/// would not record. Without them, a filtering configuration yields
/// the last known IPv4 of every interested device. The result is a
/// snapshot; later configuration edits do not reach a running session.
pub fn select_targets(
    config: &DeviceFilterConfig,
    explicit: &[Ipv4Addr],
    known_devices: &[Device],
) -> TargetSelection {
    let mut selection = TargetSelection::default();
    let by_mac: HashMap<MacAddr, &Device> = known_devices.iter().map(|d| (d.mac, d)).collect();

    if !explicit.is_empty() {
        for ip in explicit {
            if !selection.targets.contains(ip) {
                selection.targets.push(*ip);
            }
        }
        if config.filtering_enabled() {
            let interested: Vec<IpAddr> = config
                .interested
                .iter()
                .filter_map(|mac| by_mac.get(mac).map(|d| d.last_known_ip))
                .collect();
            for ip in &selection.targets {
                if !interested.contains(&IpAddr::V4(*ip)) {
                    warn!(
                        target_ip = %ip,
                        "Target is not an interested device, its traffic will not be recorded"
                    );
                    selection.outside_filter.push(*ip);
                }
            }
        }
        return selection;
    }

    if !config.filtering_enabled() {
        return selection;
    }

    for mac in &config.interested {
        match by_mac.get(mac).map(|d| d.last_known_ip) {
            Some(IpAddr::V4(ip)) if !selection.targets.contains(&ip) => selection.targets.push(ip),
            Some(IpAddr::V4(_)) => {}
            _ => {
                warn!(mac = %mac, "Interested device has no known IPv4 address, skipping");
                selection.skipped.push(*mac);
            }
        }
    }

    selection
}
