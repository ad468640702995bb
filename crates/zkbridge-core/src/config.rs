//! Bridge configuration.
//!
//! All sections deserialize with defaults, so an empty file (or no file at
//! all) yields a working configuration:
//!
//! ```toml
//! [device]
//! max_reconnect_attempts = 5
//! scan_timeout_secs = 15
//! probe_order = ["sdk", "hid", "serial"]
//! com_port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [websocket]
//! bind_addr = "0.0.0.0:8765"
//!
//! [api]
//! enabled = true
//! bind_addr = "0.0.0.0:8080"
//! ```

use crate::constants::*;
use crate::types::ConnectionType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration passed to every component at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub device: DeviceConfig,
    pub websocket: WebSocketConfig,
    pub api: ApiConfig,
    pub identity: IdentityConfig,
}

impl BridgeConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] for malformed TOML and
    /// [`Error::InvalidConfig`] when a value is out of range.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigIo`] when the file cannot be read, otherwise
    /// the same errors as [`BridgeConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        self.device.validate()
    }
}

/// Device discovery, reconnect and capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Consecutive failed connects before `connect()` short-circuits.
    pub max_reconnect_attempts: u32,
    /// Capture timeout enforced by the transport poll loop.
    pub scan_timeout_secs: u64,
    /// Caller-side slack on top of the capture timeout.
    pub worker_grace_secs: u64,
    /// Caller-side limit on a full connect probe.
    pub connect_timeout_secs: u64,
    /// Read poll interval inside the capture loop.
    pub poll_interval_ms: u64,
    /// Bytes to wait for before a capture response is parsed.
    pub min_response_len: usize,
    /// Transport probe order.
    pub probe_order: Vec<ConnectionType>,
    /// Serial port to fall back to when auto-detection finds nothing.
    pub com_port: Option<String>,
    /// Baud rate tried before the built-in list.
    pub baud_rate: Option<u32>,
    pub baud_rates: Vec<u32>,
    pub serial_vendor_ids: Vec<u16>,
    pub serial_keywords: Vec<String>,
    /// Highest port index tried by brute-force probing.
    pub probe_port_limit: u32,
    pub serial_test_delay_ms: u64,
    pub serial_read_timeout_ms: u64,
    pub hid_devices: Vec<HidDeviceId>,
    pub hid_test_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            worker_grace_secs: DEFAULT_WORKER_GRACE_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            min_response_len: DEFAULT_MIN_RESPONSE_LEN,
            probe_order: ConnectionType::PRIORITY.to_vec(),
            com_port: None,
            baud_rate: None,
            baud_rates: DEFAULT_BAUD_RATES.to_vec(),
            serial_vendor_ids: DEFAULT_SERIAL_VENDOR_IDS.to_vec(),
            serial_keywords: DEFAULT_SERIAL_KEYWORDS.iter().map(ToString::to_string).collect(),
            probe_port_limit: DEFAULT_PROBE_PORT_LIMIT,
            serial_test_delay_ms: DEFAULT_SERIAL_TEST_DELAY_MS,
            serial_read_timeout_ms: DEFAULT_SERIAL_READ_TIMEOUT_MS,
            hid_devices: DEFAULT_HID_DEVICES
                .iter()
                .map(|&(vendor_id, product_id)| HidDeviceId { vendor_id, product_id })
                .collect(),
            hid_test_delay_ms: DEFAULT_HID_TEST_DELAY_MS,
        }
    }
}

impl DeviceConfig {
    #[must_use]
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    #[must_use]
    pub fn worker_grace(&self) -> Duration {
        Duration::from_secs(self.worker_grace_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Baud rates in trial order: the configured rate first, then the
    /// built-in list without duplicates.
    #[must_use]
    pub fn baud_candidates(&self) -> Vec<u32> {
        let mut rates = Vec::with_capacity(self.baud_rates.len() + 1);
        for rate in self.baud_rate.iter().chain(self.baud_rates.iter()) {
            if !rates.contains(rate) {
                rates.push(*rate);
            }
        }
        rates
    }

    fn validate(&self) -> Result<()> {
        if self.max_reconnect_attempts == 0 {
            return Err(Error::InvalidConfig(
                "device.max_reconnect_attempts must be at least 1".into(),
            ));
        }
        check_range("device.scan_timeout_secs", self.scan_timeout_secs, 1, MAX_DEVICE_TIMEOUT_SECS)?;
        check_range("device.worker_grace_secs", self.worker_grace_secs, 0, MAX_DEVICE_TIMEOUT_SECS)?;
        check_range(
            "device.connect_timeout_secs",
            self.connect_timeout_secs,
            1,
            MAX_DEVICE_TIMEOUT_SECS,
        )?;
        check_range("device.poll_interval_ms", self.poll_interval_ms, 1, MAX_POLL_INTERVAL_MS)?;
        if self.probe_order.is_empty() {
            return Err(Error::InvalidConfig("device.probe_order must not be empty".into()));
        }
        for (i, kind) in self.probe_order.iter().enumerate() {
            if self.probe_order[..i].contains(kind) {
                return Err(Error::InvalidConfig(format!(
                    "device.probe_order lists {kind} more than once"
                )));
            }
        }
        if self.baud_candidates().is_empty() {
            return Err(Error::InvalidConfig("device.baud_rates must not be empty".into()));
        }
        if self.min_response_len < MIN_FRAME_LEN {
            return Err(Error::InvalidConfig(format!(
                "device.min_response_len must be at least {MIN_FRAME_LEN}"
            )));
        }
        Ok(())
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{field} must be between {min} and {max}, got {value}"
        )))
    }
}

/// USB vendor/product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HidDeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl std::fmt::Display for HidDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Persistent channel front-end settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub bind_addr: SocketAddr,
    /// Advertised path; clients may connect on any path.
    pub path: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_WS_BIND,
            path: DEFAULT_WS_PATH.to_string(),
        }
    }
}

/// Request/response front-end settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: DEFAULT_API_BIND,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Address advertised to clients instead of the auto-detected one.
    pub advertise_ip: Option<IpAddr>,
}
