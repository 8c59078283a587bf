//! Passive monitoring for lanwatch
//!
//! Frames from the capture layer go through [`Pipeline`]: the
//! [`DeviceRegistry`] learns who sent them, the [`DeviceFilter`] decides
//! whether that device is of interest, and the DNS decoder or
//! [`ConnectionTracker`] turns them into events for the [`ActivityStore`].
//!
//! Decrypted application flows take a separate path through
//! [`FlowInterceptor`], fed over TCP by [`FlowFeed`].

pub mod connection;
pub mod feed;
pub mod filter;
pub mod intercept;
pub mod pipeline;
pub mod redact;
pub mod registry;
pub mod store;
pub mod targets;

pub use connection::ConnectionTracker;
pub use feed::FlowFeed;
pub use filter::{
    DeviceFilter, DeviceFilterConfig, FilterConfigStore, FilterStatus, JsonFilterStore,
    MemoryFilterStore,
};
pub use intercept::{DecryptedFlow, FlowInterceptor};
pub use pipeline::{Pipeline, PipelineStats};
pub use registry::{DeviceRegistry, Observation};
pub use store::{ActivityStore, RetryPolicy, Table};
pub use targets::{select_targets, TargetSelection};

use std::net::Ipv4Addr;

/// Address on the local segment: RFC 1918 private or link-local
pub fn is_local_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local()
}
