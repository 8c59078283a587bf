//! Packet capture wrapper around pcap

use chrono::{DateTime, Utc};
use lanwatch_core::{Error, Interface, Packet, Result};
use parking_lot::RwLock;
use pcap::{Active, Capture, Device};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::stats::{CaptureStats, StatsAccumulator};

/// Default snapshot length (maximum bytes per packet)
const DEFAULT_SNAPLEN: i32 = 65535;

/// Default timeout for packet capture (milliseconds)
const DEFAULT_TIMEOUT_MS: i32 = 500;

/// Default depth of the frame channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Configuration for packet capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Maximum bytes to capture per packet
    pub snaplen: i32,
    /// Read timeout in milliseconds; bounds how long `stop` waits
    pub timeout_ms: i32,
    /// Enable promiscuous mode
    pub promiscuous: bool,
    /// Enable immediate mode (deliver packets immediately)
    pub immediate_mode: bool,
    /// Frames buffered between capture and decode
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            promiscuous: true,
            immediate_mode: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// State of packet capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Capture is not running
    Stopped,
    /// Capture is actively running
    Running,
}

/// Live capture on one interface
pub struct PacketCapture {
    interface: Interface,
    config: CaptureConfig,
    filter: Option<String>,
    state: Arc<RwLock<CaptureState>>,
    stats: StatsAccumulator,
    worker: Option<JoinHandle<()>>,
}

impl PacketCapture {
    /// Create a new packet capture on the specified interface
    pub fn new(interface: &str) -> Result<Self> {
        Self::with_config(interface, CaptureConfig::default())
    }

    /// Create a new packet capture with custom configuration
    pub fn with_config(interface: &str, config: CaptureConfig) -> Result<Self> {
        let interface = Interface::by_name(interface)?;
        if !interface.is_up {
            return Err(Error::Capture(format!(
                "Interface '{}' is not up",
                interface.name
            )));
        }

        debug!(interface = %interface.name, "Created packet capture");

        Ok(Self {
            interface,
            config,
            filter: None,
            state: Arc::new(RwLock::new(CaptureState::Stopped)),
            stats: StatsAccumulator::new(),
            worker: None,
        })
    }

    /// Set the BPF filter applied when the capture opens
    pub fn set_filter(&mut self, bpf: &str) {
        debug!(filter = bpf, "Setting BPF filter");
        self.filter = Some(bpf.to_string());
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Get current capture state
    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == CaptureState::Running
    }

    /// Get current statistics
    pub fn stats(&self) -> CaptureStats {
        self.stats.snapshot()
    }

    fn open(&self) -> Result<Capture<Active>> {
        let device = Device::from(self.interface.name.as_str());
        let inactive = Capture::from_device(device)
            .map_err(|e| Error::Capture(format!("Failed to create capture: {}", e)))?
            .promisc(self.config.promiscuous)
            .snaplen(self.config.snaplen)
            .timeout(self.config.timeout_ms)
            .immediate_mode(self.config.immediate_mode);

        let mut capture = inactive.open().map_err(|e| {
            let msg = e.to_string();
            if msg.contains("ermission") || msg.contains("not permitted") {
                Error::InsufficientPrivileges(format!(
                    "capture on {}: {}",
                    self.interface.name, msg
                ))
            } else {
                Error::Capture(format!("Failed to open capture: {}", msg))
            }
        })?;

        if let Some(filter) = &self.filter {
            capture
                .filter(filter, true)
                .map_err(|e| Error::Capture(format!("Invalid BPF filter '{}': {}", filter, e)))?;
        }

        Ok(capture)
    }

    /// Open the capture and start the reader thread.
    ///
    /// Opening happens on the calling thread so a missing privilege or a
    /// bad filter is returned here. The receiver yields frames until the
    /// capture stops or fails; it is the only consumer.
    pub fn start(&mut self) -> Result<Receiver<Packet>> {
        if self.is_running() {
            return Err(Error::Capture("Capture already running".to_string()));
        }

        let capture = self.open()?;
        let (tx, rx) = mpsc::sync_channel(self.config.channel_capacity.max(1));

        *self.state.write() = CaptureState::Running;
        info!(
            interface = %self.interface.name,
            filter = self.filter.as_deref().unwrap_or(""),
            "Starting packet capture"
        );

        let state = Arc::clone(&self.state);
        let stats = self.stats.clone();
        let interface = self.interface.name.clone();

        let worker = thread::Builder::new()
            .name(format!("capture-{}", interface))
            .spawn(move || {
                read_loop(capture, tx, &state, &stats, &interface);
                *state.write() = CaptureState::Stopped;
                info!(interface = %interface, "Capture thread finished");
            })
            .map_err(Error::Io)?;

        self.worker = Some(worker);
        Ok(rx)
    }

    /// Stop the reader thread and wait for it.
    ///
    /// The thread notices within one read timeout.
    pub fn stop(&mut self) {
        *self.state.write() = CaptureState::Stopped;

        if let Some(worker) = self.worker.take() {
            info!(interface = %self.interface.name, "Stopping packet capture");
            if worker.join().is_err() {
                error!(interface = %self.interface.name, "Capture thread panicked");
            }
        }
    }
}

fn read_loop(
    mut capture: Capture<Active>,
    tx: SyncSender<Packet>,
    state: &RwLock<CaptureState>,
    stats: &StatsAccumulator,
    interface: &str,
) {
    let mut reads: u64 = 0;

    while *state.read() == CaptureState::Running {
        let packet = match capture.next_packet() {
            Ok(packet) => {
                let ts = timestamp(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as i64);
                Packet {
                    timestamp: ts,
                    interface: interface.to_string(),
                    data: packet.data.to_vec(),
                    len: packet.header.len as usize,
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                error!(interface = %interface, error = %e, "Packet capture error");
                break;
            }
        };

        stats.record_packet(packet.data.len());
        match tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                stats.record_drops(1);
                if stats.packets_dropped().is_power_of_two() {
                    warn!(
                        interface = %interface,
                        dropped = stats.packets_dropped(),
                        "Decode stage is behind, dropping frames"
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(interface = %interface, "Frame receiver gone");
                break;
            }
        }

        reads += 1;
        if reads % 1024 == 0 {
            if let Ok(stat) = capture.stats() {
                stats.set_kernel_dropped(stat.dropped as u64);
            }
        }
    }
}

fn timestamp(secs: i64, micros: i64) -> DateTime<Utc> {
    let nanos = (micros.clamp(0, 999_999) as u32) * 1000;
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
}

impl Drop for PacketCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
