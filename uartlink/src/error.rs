//! Common error types for uartlink.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from underlying error types used throughout the crate.

use thiserror::Error;

/// Main error type for uartlink operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port enumeration failed
    #[error("Port enumeration error: {0}")]
    Enumeration(#[source] tokio_serial::Error),

    /// A single port failed to open
    #[error("Failed to open port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// Every candidate port was tried and none held the device
    #[error("No device found on any candidate port")]
    NoDeviceFound,

    /// Write to the active link failed
    #[error("Write error: {0}")]
    Write(std::io::Error),

    /// Operation attempted on a closed manager or with no active link
    #[error("Link is closed")]
    Closed,

    /// Packet encryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
