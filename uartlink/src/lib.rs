//! uartlink: a link manager for one UART-attached device.
//!
//! Discovers the device across the system's serial ports, keeps exactly one
//! connection alive with a liveness heartbeat, reconnects automatically
//! after loss, and gates outgoing packets through per-session encryption.

pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod link;
pub mod manager;
pub mod session;
pub mod tracing;

pub use error::{Error, Result};
