//! Default gateway lookup from the kernel routing table

use lanwatch_core::{Error, Result};
use std::fs;
use std::net::Ipv4Addr;
use tracing::debug;

const ROUTE_TABLE: &str = "/proc/net/route";

/// Gateway of the default route, optionally restricted to one interface
pub fn default_gateway(interface: Option<&str>) -> Result<Ipv4Addr> {
    let table = fs::read_to_string(ROUTE_TABLE)
        .map_err(|e| Error::config(format!("cannot read {}: {}", ROUTE_TABLE, e)))?;

    let gateway = parse_default_gateway(&table, interface).ok_or_else(|| {
        Error::config(match interface {
            Some(name) => format!("no default route via {}", name),
            None => "no default route".to_string(),
        })
    })?;
    debug!(gateway = %gateway, "Default gateway");
    Ok(gateway)
}

/// Parse `/proc/net/route` text.
///
/// Addresses are little-endian hex; a default route has destination and
/// mask zero.
pub fn parse_default_gateway(table: &str, interface: Option<&str>) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 8 {
            return None;
        }
        if interface.is_some_and(|name| name != cols[0]) {
            return None;
        }
        let destination = u32::from_str_radix(cols[1], 16).ok()?;
        let mask = u32::from_str_radix(cols[7], 16).ok()?;
        if destination != 0 || mask != 0 {
            return None;
        }
        let gateway = u32::from_str_radix(cols[2], 16).ok()?;
        (gateway != 0).then(|| Ipv4Addr::from(gateway.swap_bytes()))
    })
}
