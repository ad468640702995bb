//! Transport driver capability.
//!
//! A transport is one physical access method to the scanner. Each driver
//! owns at most one open link at a time and exposes the same five
//! primitives, so the connection manager can probe them in a configurable
//! order without knowing how any of them frame their bytes.
//!
//! All primitives are blocking. The async boundary lives in
//! [`DeviceService`](crate::service::DeviceService), which runs them on the
//! blocking thread pool.

use crate::Result;
use crate::frame::RawCapture;
use std::fmt;
use std::time::Duration;
use zkbridge_core::{ConnectionType, DeviceMetadata, HidDeviceId};

/// What `discover` found: enough information for `open` to try every
/// connection parameter in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceHandle {
    /// Vendor SDK reported `device_count` scanners; `open` binds index 0.
    Sdk { device_count: u32 },
    /// Allow-listed HID devices present on the bus, in allow-list order.
    Hid { candidates: Vec<HidDeviceId> },
    /// Candidate serial ports, each tried at every baud rate in order.
    Serial {
        ports: Vec<String>,
        baud_rates: Vec<u32>,
    },
    /// Simulated device.
    Mock { device_count: u32 },
}

impl DeviceHandle {
    /// Device count reported by discovery.
    #[must_use]
    pub fn device_count(&self) -> u32 {
        match self {
            Self::Sdk { device_count } | Self::Mock { device_count } => *device_count,
            Self::Hid { candidates } => candidates.len() as u32,
            Self::Serial { ports, .. } => ports.len() as u32,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sdk { device_count } => write!(f, "sdk ({device_count} devices)"),
            Self::Hid { candidates } => {
                write!(f, "hid [")?;
                for (i, id) in candidates.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{id}")?;
                }
                write!(f, "]")
            }
            Self::Serial { ports, baud_rates } => {
                write!(f, "serial {ports:?} @ {baud_rates:?}")
            }
            Self::Mock { device_count } => write!(f, "mock ({device_count} devices)"),
        }
    }
}

/// Blocking access to one transport.
///
/// Implementations never panic on hardware faults: discovery and open
/// report absence as `None` / `false`, and capture reports failures as
/// [`TransportError`](crate::TransportError) values.
pub trait TransportDriver: Send {
    /// Transport tag reported in status snapshots.
    fn kind(&self) -> ConnectionType;

    /// Look for a device without keeping anything open.
    fn discover(&mut self) -> Option<DeviceHandle>;

    /// Open the first connection parameter set that passes
    /// [`self_test`](TransportDriver::self_test). Never leaves a link open
    /// on failure.
    fn open(&mut self, handle: &DeviceHandle) -> bool;

    /// Release the open link. Closing with nothing open succeeds.
    fn close(&mut self) -> bool;

    /// Check that the open link answers.
    fn self_test(&mut self) -> bool;

    /// Acquire one template, waiting at most `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// Timeouts and device status codes are non-fatal; any other error
    /// means the link can no longer be trusted.
    fn capture(&mut self, timeout: Duration) -> Result<RawCapture>;

    /// Metadata for the open link. Called once right after `open`.
    fn metadata(&mut self) -> DeviceMetadata;

    /// Whether a link is currently open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_count() {
        assert_eq!(DeviceHandle::Sdk { device_count: 2 }.device_count(), 2);
        let handle = DeviceHandle::Serial {
            ports: vec!["COM3".into()],
            baud_rates: vec![9600, 115200],
        };
        assert_eq!(handle.device_count(), 1);
    }

    #[test]
    fn test_display() {
        let handle = DeviceHandle::Hid {
            candidates: vec![
                HidDeviceId {
                    vendor_id: 0x1b55,
                    product_id: 0x0124,
                },
                HidDeviceId {
                    vendor_id: 0x2808,
                    product_id: 0x0001,
                },
            ],
        };
        assert_eq!(handle.to_string(), "hid [1b55:0124, 2808:0001]");
        assert_eq!(
            DeviceHandle::Sdk { device_count: 1 }.to_string(),
            "sdk (1 devices)"
        );
    }
}
