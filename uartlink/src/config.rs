//! Configuration for uartlink.
//!
//! This module handles loading configuration from a JSON file and
//! environment variables. The composing caller derives the enumeration
//! strategy and candidate filter from this config once, at startup; the
//! link manager itself never reads configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure for the link daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Search for the device by USB identity instead of listing all ports
    pub search_by_id: bool,

    /// Filter candidate ports by manufacturer string
    pub use_manufacturer: bool,

    /// Re-run discovery after connection loss or exhaustion
    pub auto_reconnect: bool,

    /// Skip discovery and connect to this port only
    pub forced_port: Option<String>,

    /// Serial baud rate
    pub baud_rate: u32,

    /// Device id stamped on every outgoing frame
    pub device_id: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_by_id: false,
            use_manufacturer: true,
            auto_reconnect: true,
            forced_port: None,
            baud_rate: 230_400,
            device_id: 42,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, then apply environment
    /// overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Ok(config.with_env_overrides())
    }

    /// Defaults plus environment overrides, for running without a config
    /// file.
    pub fn from_env() -> Self {
        Config::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_bool("UARTLINK_SEARCH_BY_ID") {
            self.search_by_id = v;
        }
        if let Some(v) = env_bool("UARTLINK_USE_MANUFACTURER") {
            self.use_manufacturer = v;
        }
        if let Some(v) = env_bool("UARTLINK_AUTO_RECONNECT") {
            self.auto_reconnect = v;
        }
        if let Ok(port) = std::env::var("UARTLINK_PORT") {
            if !port.is_empty() {
                self.forced_port = Some(port);
            }
        }
        if let Some(baud) = std::env::var("UARTLINK_BAUD")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            self.baud_rate = baud;
        }
        self
    }
}

fn env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(!config.search_by_id);
        assert!(config.use_manufacturer);
        assert!(config.auto_reconnect);
        assert!(config.forced_port.is_none());
    }

    #[test]
    fn parses_partial_json() {
        let config: Config =
            serde_json::from_str(r#"{"forced_port": "COM7", "auto_reconnect": false}"#).unwrap();
        assert_eq!(config.forced_port.as_deref(), Some("COM7"));
        assert!(!config.auto_reconnect);
        // Unlisted fields keep their defaults
        assert!(config.use_manufacturer);
    }
}
