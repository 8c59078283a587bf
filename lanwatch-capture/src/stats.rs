//! Capture counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Point-in-time capture counters
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    /// Frames read from pcap
    pub packets_received: u64,
    /// Frames discarded because the decode channel was full
    pub packets_dropped: u64,
    /// Frames dropped by the kernel, as reported by pcap
    pub kernel_dropped: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Capture duration
    pub duration: Duration,
    /// Packets per second
    pub packets_per_second: f64,
}

impl CaptureStats {
    /// Share of read frames discarded before decoding, as a percentage
    pub fn drop_rate(&self) -> f64 {
        if self.packets_received == 0 {
            return 0.0;
        }
        (self.packets_dropped as f64 / self.packets_received as f64) * 100.0
    }

    /// Check if there are significant drops
    pub fn has_significant_drops(&self, threshold_percent: f64) -> bool {
        self.drop_rate() > threshold_percent
    }

    /// Format statistics as human-readable string
    pub fn format(&self) -> String {
        format!(
            "Received: {} packets ({} bytes)\n\
             Dropped: {} packets ({:.2}%), kernel: {}\n\
             Duration: {:.2}s, {:.2} pps",
            self.packets_received,
            self.bytes_received,
            self.packets_dropped,
            self.drop_rate(),
            self.kernel_dropped,
            self.duration.as_secs_f64(),
            self.packets_per_second,
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    bytes: AtomicU64,
    channel_dropped: AtomicU64,
    kernel_dropped: AtomicU64,
}

/// Counters shared between the capture thread and its owner
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    counters: Arc<Counters>,
    started: Instant,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            started: Instant::now(),
        }
    }

    pub fn record_packet(&self, size: usize) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record frames discarded on a full channel
    pub fn record_drops(&self, count: u64) {
        self.counters.channel_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Store the kernel drop counter last reported by pcap
    pub fn set_kernel_dropped(&self, count: u64) {
        self.counters.kernel_dropped.store(count, Ordering::Relaxed);
    }

    pub fn packets_dropped(&self) -> u64 {
        self.counters.channel_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CaptureStats {
        let c = &self.counters;
        let packets_received = c.received.load(Ordering::Relaxed);
        let duration = self.started.elapsed();
        let secs = duration.as_secs_f64();

        CaptureStats {
            packets_received,
            packets_dropped: c.channel_dropped.load(Ordering::Relaxed),
            kernel_dropped: c.kernel_dropped.load(Ordering::Relaxed),
            bytes_received: c.bytes.load(Ordering::Relaxed),
            duration,
            packets_per_second: if secs > 0.0 {
                packets_received as f64 / secs
            } else {
                0.0
            },
        }
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
