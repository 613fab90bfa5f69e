//! Serial port discovery and candidate filtering.
//!
//! Discovery produces a snapshot of the ports present on the system; the
//! candidate filter decides which of them are plausible homes for the
//! target device. The enumeration strategy is chosen once from
//! configuration by the composing caller and injected into the link
//! manager as a value.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_serial::SerialPortType;

use crate::error::{Error, Result};

/// Manufacturer substrings accepted by [`FilterMode::Manufacturer`].
///
/// Platform manufacturer strings vary, so these are matched as
/// case-sensitive substrings rather than exactly.
const KNOWN_MANUFACTURERS: &[&str] = &["Silicon Lab", "SEGGER"];

/// One enumerated serial port. Produced fresh on every discovery pass,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub path: String,
    pub manufacturer: Option<String>,
    pub connected: bool,
}

/// USB vendor and product IDs for device identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

/// USB identities the device is known to present.
pub const KNOWN_USB_IDS: &[UsbId] = &[
    // Silicon Labs CP210x UART bridge
    UsbId { vid: 0x10c4, pid: 0xea60 },
    // SEGGER J-Link CDC
    UsbId { vid: 0x1366, pid: 0x0105 },
];

/// Strategy for producing the port snapshot a discovery pass works from.
///
/// Returned map is ordered by port path; candidate trial follows this
/// order.
#[async_trait]
pub trait PortEnumerator: Send + Sync {
    async fn list_ports(&self) -> Result<BTreeMap<String, PortDescriptor>>;
}

/// Generic OS port listing. Returns every serial port on the system.
pub struct SystemEnumerator;

#[async_trait]
impl PortEnumerator for SystemEnumerator {
    async fn list_ports(&self) -> Result<BTreeMap<String, PortDescriptor>> {
        let ports = tokio::task::spawn_blocking(tokio_serial::available_ports)
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .map_err(Error::Enumeration)?;

        Ok(ports
            .into_iter()
            .map(|info| {
                let manufacturer = match &info.port_type {
                    SerialPortType::UsbPort(usb) => usb.manufacturer.clone(),
                    _ => None,
                };
                (
                    info.port_name.clone(),
                    PortDescriptor {
                        path: info.port_name,
                        manufacturer,
                        connected: false,
                    },
                )
            })
            .collect())
    }
}

/// Identity-based lookup: only ports whose USB VID/PID matches a known
/// device identity are returned. Every port this enumerator yields is
/// already vetted, so the candidate filter accepts them all.
pub struct DeviceIdEnumerator {
    known_ids: Vec<UsbId>,
}

impl DeviceIdEnumerator {
    pub fn new() -> Self {
        Self { known_ids: KNOWN_USB_IDS.to_vec() }
    }

    pub fn with_ids(known_ids: Vec<UsbId>) -> Self {
        Self { known_ids }
    }

    fn matches(&self, vid: u16, pid: u16) -> bool {
        self.known_ids.contains(&UsbId { vid, pid })
    }
}

impl Default for DeviceIdEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortEnumerator for DeviceIdEnumerator {
    async fn list_ports(&self) -> Result<BTreeMap<String, PortDescriptor>> {
        let ports = tokio::task::spawn_blocking(tokio_serial::available_ports)
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .map_err(Error::Enumeration)?;

        Ok(ports
            .into_iter()
            .filter_map(|info| {
                let usb = match &info.port_type {
                    SerialPortType::UsbPort(usb) => usb.clone(),
                    _ => return None,
                };
                if !self.matches(usb.vid, usb.pid) {
                    return None;
                }
                Some((
                    info.port_name.clone(),
                    PortDescriptor {
                        path: info.port_name,
                        manufacturer: usb.manufacturer,
                        connected: false,
                    },
                ))
            })
            .collect())
    }
}

/// Which enumerated ports count as candidates for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Identity search already vetted the ports; accept everything.
    DeviceId,
    /// Accept ports whose manufacturer matches a known substring.
    Manufacturer,
    /// Accept every enumerated port.
    All,
}

impl FilterMode {
    /// Derive the filter mode from the configuration surface.
    pub fn from_config(search_by_id: bool, use_manufacturer: bool) -> Self {
        if search_by_id {
            FilterMode::DeviceId
        } else if use_manufacturer {
            FilterMode::Manufacturer
        } else {
            FilterMode::All
        }
    }

    /// Is this port a plausible candidate for the device?
    pub fn accepts(&self, descriptor: &PortDescriptor) -> bool {
        match self {
            FilterMode::DeviceId | FilterMode::All => true,
            FilterMode::Manufacturer => descriptor
                .manufacturer
                .as_deref()
                .is_some_and(|m| KNOWN_MANUFACTURERS.iter().any(|k| m.contains(k))),
        }
    }
}
