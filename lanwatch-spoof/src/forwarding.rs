//! Kernel IP forwarding probe
//!
//! Redirected traffic only reaches its real destination when this host
//! forwards it. Turning forwarding on is left to the operator.

use std::fmt;
use std::fs;
use std::path::Path;

const IP_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingState {
    Enabled,
    Disabled,
    /// Not readable on this platform or without permission
    Unknown,
}

impl fmt::Display for ForwardingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForwardingState::Enabled => "enabled",
            ForwardingState::Disabled => "disabled",
            ForwardingState::Unknown => "unknown",
        })
    }
}

/// Current IPv4 forwarding state of the host
pub fn ip_forwarding_state() -> ForwardingState {
    if cfg!(target_os = "linux") {
        read_forwarding(Path::new(IP_FORWARD))
    } else {
        ForwardingState::Unknown
    }
}

fn read_forwarding(path: &Path) -> ForwardingState {
    match fs::read_to_string(path).map(|s| s.trim().to_string()) {
        Ok(v) if v == "1" => ForwardingState::Enabled,
        Ok(v) if v == "0" => ForwardingState::Disabled,
        _ => ForwardingState::Unknown,
    }
}
