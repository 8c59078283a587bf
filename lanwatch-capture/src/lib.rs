//! Packet capture for lanwatch
//!
//! A thin wrapper around pcap. The capture loop runs on its own thread and
//! hands frames to the decode stage through a bounded channel; when the
//! decode stage falls behind, frames are dropped and counted instead of
//! queueing without limit.
//!
//! ## Example
//!
//! ```no_run
//! use lanwatch_capture::{filters, PacketCapture};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut capture = PacketCapture::new("eth0")?;
//! capture.set_filter(&filters::monitor_filter(&[80, 443]));
//!
//! let frames = capture.start()?;
//! for packet in frames.iter().take(10) {
//!     println!("Got frame: {} bytes", packet.len());
//! }
//!
//! capture.stop();
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod filters;
pub mod stats;

pub use capture::{CaptureConfig, CaptureState, PacketCapture};
pub use stats::{CaptureStats, StatsAccumulator};
