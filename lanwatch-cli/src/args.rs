//! CLI argument parsing

use clap::{Parser, Subcommand};
use ipnetwork::Ipv4Network;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lanwatch")]
#[command(version, about = "LAN activity monitor", long_about = None)]
pub struct Cli {
    /// Network interface to use (defaults to the first usable one)
    #[arg(short = 'I', long, global = true, env = "LANWATCH_INTERFACE")]
    pub interface: Option<String>,

    /// Activity database
    #[arg(
        long,
        global = true,
        env = "LANWATCH_DB",
        value_name = "PATH",
        default_value = "lanwatch.db"
    )]
    pub db: PathBuf,

    /// Device filter configuration file
    #[arg(
        long,
        global = true,
        env = "LANWATCH_FILTER",
        value_name = "PATH",
        default_value = "device_filter.json"
    )]
    pub filter_config: PathBuf,

    /// Verbose output (-v, -vv, -vvv for increasing verbosity)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available network interfaces
    Interfaces,

    /// Capture traffic and record device activity until interrupted
    Monitor {
        /// Accept decrypted flows as JSON lines on this address
        #[arg(long, value_name = "ADDR")]
        flow_listen: Option<SocketAddr>,

        /// TCP destination ports recorded as connections
        #[arg(long, value_delimiter = ',', default_values_t = [80u16, 443])]
        ports: Vec<u16>,
    },

    /// Redirect traffic of the targets through this host until interrupted
    Spoof {
        /// Target address; repeat for several. Without it, the interested
        /// devices of the filter are used
        #[arg(short, long = "target", value_name = "IP")]
        targets: Vec<Ipv4Addr>,

        /// Gateway address (defaults to the default route)
        #[arg(short, long, value_name = "IP")]
        gateway: Option<Ipv4Addr>,

        /// Seconds between poison rounds
        #[arg(long, value_name = "SECONDS", default_value = "2")]
        interval: u64,
    },

    /// Manage which devices are recorded
    Devices {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Send an ARP request to every host of a subnet
    Scan {
        /// Subnet to sweep (defaults to the interface network)
        #[arg(short, long, value_name = "CIDR")]
        network: Option<Ipv4Network>,
    },

    /// Show recently recorded activity
    History {
        /// Entries shown per category
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum DeviceAction {
    /// Show the filter mode, interested devices and known devices
    Status,
    /// Record this device
    Add { mac: String },
    /// Stop recording this device
    Remove { mac: String },
    /// Record only the interested devices
    Enable,
    /// Record every device
    Disable,
    /// Empty the interested list
    Clear,
    /// Set a device's display name; omit NAME to clear it
    Name { mac: String, name: Option<String> },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Default tracing directive for the `-v` count
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
