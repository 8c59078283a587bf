//! Network interface types

use crate::{Error, MacAddr, PacketSender, Result};
use ipnetwork::Ipv4Network;
use parking_lot::Mutex;
use pnet_datalink::{self, Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Network interface
#[derive(Debug, Clone)]
pub struct Interface {
    /// Interface name (e.g., "eth0", "en0")
    pub name: String,
    /// Interface index
    pub index: u32,
    /// MAC address
    pub mac_address: MacAddr,
    /// First IPv4 network assigned to the interface
    pub ipv4: Option<Ipv4Network>,
    /// Is interface up?
    pub is_up: bool,
    /// Is this the loopback interface?
    pub is_loopback: bool,
}

impl Interface {
    fn from_pnet(iface: &NetworkInterface) -> Self {
        let mac_address = iface
            .mac
            .map(|m| MacAddr::new([m.0, m.1, m.2, m.3, m.4, m.5]))
            .unwrap_or_else(MacAddr::zero);

        let ipv4 = iface.ips.iter().find_map(|net| match net {
            ipnetwork::IpNetwork::V4(v4) => Some(*v4),
            ipnetwork::IpNetwork::V6(_) => None,
        });

        Self {
            name: iface.name.clone(),
            index: iface.index,
            mac_address,
            ipv4,
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
        }
    }

    fn find_pnet(name: &str) -> Result<NetworkInterface> {
        pnet_datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))
    }

    /// Get interface by name
    pub fn by_name(name: &str) -> Result<Self> {
        Ok(Self::from_pnet(&Self::find_pnet(name)?))
    }

    /// List all available interfaces
    pub fn list_all() -> Vec<Self> {
        pnet_datalink::interfaces()
            .iter()
            .map(Self::from_pnet)
            .collect()
    }

    /// First interface that is up, not loopback, and carries an IPv4 address
    pub fn default_interface() -> Result<Self> {
        Self::list_all()
            .into_iter()
            .find(|i| i.is_up && !i.is_loopback && i.ipv4.is_some())
            .ok_or_else(|| Error::InterfaceNotFound("no usable default interface".to_string()))
    }

    /// IPv4 address of this interface
    pub fn ipv4_addr(&self) -> Option<Ipv4Addr> {
        self.ipv4.map(|net| net.ip())
    }

    /// Open a raw Ethernet channel.
    ///
    /// `read_timeout` bounds each receive so callers can poll deadlines.
    pub fn open_channel(
        &self,
        read_timeout: Option<Duration>,
    ) -> Result<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>)> {
        let iface = Self::find_pnet(&self.name)?;
        let config = Config {
            read_timeout,
            ..Default::default()
        };

        match pnet_datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => Ok((tx, rx)),
            Ok(_) => Err(Error::Interface("Unsupported channel type".to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(
                Error::InsufficientPrivileges(format!("raw socket on {}: {}", self.name, e)),
            ),
            Err(e) => Err(Error::Interface(format!("Failed to create channel: {}", e))),
        }
    }

    /// Open a persistent datalink sender on this interface
    pub fn sender(&self) -> Result<DatalinkSender> {
        let (tx, _rx) = self.open_channel(None)?;
        Ok(DatalinkSender {
            interface: self.name.clone(),
            tx: Mutex::new(tx),
        })
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ipv4 {
            Some(net) => write!(f, "{} ({}, {})", self.name, self.mac_address, net),
            None => write!(f, "{} ({})", self.name, self.mac_address),
        }
    }
}

/// [`PacketSender`] writing frames to a pnet datalink channel
pub struct DatalinkSender {
    interface: String,
    tx: Mutex<Box<dyn DataLinkSender>>,
}

impl DatalinkSender {
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl PacketSender for DatalinkSender {
    fn send(&self, frame: &[u8]) -> Result<()> {
        self.tx
            .lock()
            .send_to(frame, None)
            .ok_or_else(|| Error::Interface("Failed to send packet".to_string()))?
            .map_err(|e| Error::Interface(format!("Send error on {}: {}", self.interface, e)))
    }
}

impl fmt::Debug for DatalinkSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatalinkSender")
            .field("interface", &self.interface)
            .finish()
    }
}
