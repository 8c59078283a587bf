//! Error types for lanwatch

use thiserror::Error;

/// Result type alias for lanwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lanwatch
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed hardware address
    #[error("Invalid hardware address '{0}'")]
    InvalidMac(String),

    /// Interface not found
    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    /// Interface error
    #[error("Interface error: {0}")]
    Interface(String),

    /// Packet parsing error
    #[error("Packet parsing error: {0}")]
    PacketParsing(String),

    /// Capture error
    #[error("Packet capture error: {0}")]
    Capture(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address resolution failed
    #[error("Could not resolve hardware address for {0}")]
    Unresolved(std::net::Ipv4Addr),

    /// ARP caches could not be restored
    #[error("ARP restoration failed: {0}")]
    Restore(String),

    /// Insufficient privileges
    #[error("Insufficient privileges: {0}")]
    InsufficientPrivileges(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation interrupted
    #[error("Operation interrupted: {0}")]
    Interrupted(String),
}

impl Error {
    /// Create a storage error with a custom message
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a packet parsing error with a custom message
    pub fn parsing<S: Into<String>>(msg: S) -> Self {
        Error::PacketParsing(msg.into())
    }
}
