//! lanwatch core library
//!
//! This crate provides the types shared by every lanwatch component: the
//! error enum, canonical hardware addresses, device records, the activity
//! event model, and the two seams the active components are built on
//! (`PacketSender` for raw frame injection and `AddressResolver` for
//! IPv4 to hardware address lookups).

pub mod device;
pub mod error;
pub mod event;
pub mod interface;
pub mod packet;
pub mod resolve;
pub mod sender;
pub mod types;

// Re-export commonly used types
pub use device::{Device, DeviceRef};
pub use error::{Error, Result};
pub use event::{
    ActivityEvent, BrowsingHistoryEvent, ConnectionEvent, DnsQueryEvent, DnsRecordType,
    FormSubmissionEvent, ProtocolGuess, SearchEngine, SearchQueryEvent,
};
pub use interface::{DatalinkSender, Interface};
pub use packet::Packet;
pub use resolve::{AddressResolver, StaticResolver};
pub use sender::{MemorySender, PacketSender};
pub use types::*;
