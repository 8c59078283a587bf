//! IP to hardware address resolution seam

use crate::{Error, MacAddr, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Resolves an IPv4 address on the local segment to its hardware address
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolve `ip`, failing with [`Error::Unresolved`] when nobody answers
    async fn resolve(&self, ip: Ipv4Addr) -> Result<MacAddr>;
}

/// Resolver backed by a fixed table
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: Mutex<HashMap<Ipv4Addr, MacAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (Ipv4Addr, MacAddr)>) -> Self {
        Self {
            table: Mutex::new(entries.into_iter().collect()),
        }
    }

    pub fn insert(&self, ip: Ipv4Addr, mac: MacAddr) {
        self.table.lock().insert(ip, mac);
    }

    pub fn remove(&self, ip: &Ipv4Addr) {
        self.table.lock().remove(ip);
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, ip: Ipv4Addr) -> Result<MacAddr> {
        self.table
            .lock()
            .get(&ip)
            .copied()
            .ok_or(Error::Unresolved(ip))
    }
}
