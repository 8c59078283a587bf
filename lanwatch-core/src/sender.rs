//! Frame injection seam
//!
//! The spoofer never touches a raw socket directly; it writes through a
//! [`PacketSender`]. Production code uses the datalink sender from
//! [`crate::Interface::sender`], tests use [`MemorySender`].

use crate::Result;
use parking_lot::Mutex;

/// Something that can put a complete Ethernet frame on the wire
pub trait PacketSender: Send + Sync {
    fn send(&self, frame: &[u8]) -> Result<()>;
}

/// Sender that records every frame in memory
#[derive(Debug, Default)]
pub struct MemorySender {
    frames: Mutex<Vec<Vec<u8>>>,
    fail: Mutex<bool>,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every frame sent so far
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Make subsequent sends fail with an interface error
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

impl PacketSender for MemorySender {
    fn send(&self, frame: &[u8]) -> Result<()> {
        if *self.fail.lock() {
            return Err(crate::Error::Interface("send failed".to_string()));
        }
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}
