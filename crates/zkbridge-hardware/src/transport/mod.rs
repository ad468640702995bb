//! Transport drivers and their enum dispatch wrapper.
//!
//! The set of transports is closed, so the manager holds an
//! [`AnyTransport`] per probe slot rather than a boxed trait object. Hardware
//! variants are compiled only when their cargo feature is enabled:
//!
//! | Variant | Feature |
//! |---------|---------|
//! | [`AnyTransport::Sdk`] | `zkfinger-sdk` |
//! | [`AnyTransport::Hid`] | `hid` (default) |
//! | [`AnyTransport::Serial`] | `serial` (default) |
//! | [`AnyTransport::Mock`] | always |

#[cfg(feature = "hid")]
pub mod hid;
#[cfg(feature = "zkfinger-sdk")]
pub mod sdk;
#[cfg(feature = "serial")]
pub mod serial;

use crate::Result;
use crate::frame::RawCapture;
use crate::mock::MockTransport;
use crate::traits::{DeviceHandle, TransportDriver};
use std::time::Duration;
use tracing::warn;
use zkbridge_core::{ConnectionType, DeviceConfig, DeviceMetadata};

/// Enum wrapper for transport dispatch.
///
/// # Examples
///
/// ```
/// use zkbridge_hardware::mock::MockBus;
/// use zkbridge_hardware::traits::TransportDriver;
/// use zkbridge_hardware::transport::AnyTransport;
/// use zkbridge_core::ConnectionType;
///
/// let bus = MockBus::new();
/// bus.plug(ConnectionType::Serial, 1);
///
/// let mut transport = AnyTransport::Mock(bus.transport(ConnectionType::Serial));
/// assert_eq!(transport.kind(), ConnectionType::Serial);
/// assert!(transport.discover().is_some());
/// ```
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyTransport {
    #[cfg(feature = "zkfinger-sdk")]
    Sdk(sdk::SdkTransport),
    #[cfg(feature = "hid")]
    Hid(hid::HidTransport),
    #[cfg(feature = "serial")]
    Serial(serial::SerialTransport),
    /// Simulated transport for development and testing.
    Mock(MockTransport),
}

impl AnyTransport {
    /// Hardware driver for `kind`, or `None` when its backend is not
    /// compiled in.
    #[must_use]
    pub fn for_kind(kind: ConnectionType, config: &DeviceConfig) -> Option<Self> {
        let _ = config;
        match kind {
            #[cfg(feature = "zkfinger-sdk")]
            ConnectionType::Sdk => Some(Self::Sdk(sdk::SdkTransport::new())),
            #[cfg(feature = "hid")]
            ConnectionType::Hid => Some(Self::Hid(hid::HidTransport::new(hid::HidSettings::from(
                config,
            )))),
            #[cfg(feature = "serial")]
            ConnectionType::Serial => Some(Self::Serial(serial::SerialTransport::new(
                serial::SerialSettings::from(config),
            ))),
            #[allow(unreachable_patterns)]
            other => {
                warn!(transport = %other, "Transport support not compiled in, skipping");
                None
            }
        }
    }

    /// Hardware drivers in the configured probe order.
    #[must_use]
    pub fn from_config(config: &DeviceConfig) -> Vec<Self> {
        config
            .probe_order
            .iter()
            .filter_map(|&kind| Self::for_kind(kind, config))
            .collect()
    }
}

macro_rules! dispatch {
    ($self:ident, $t:ident => $body:expr) => {
        match $self {
            #[cfg(feature = "zkfinger-sdk")]
            Self::Sdk($t) => $body,
            #[cfg(feature = "hid")]
            Self::Hid($t) => $body,
            #[cfg(feature = "serial")]
            Self::Serial($t) => $body,
            Self::Mock($t) => $body,
        }
    };
}

impl TransportDriver for AnyTransport {
    fn kind(&self) -> ConnectionType {
        dispatch!(self, t => t.kind())
    }

    fn discover(&mut self) -> Option<DeviceHandle> {
        dispatch!(self, t => t.discover())
    }

    fn open(&mut self, handle: &DeviceHandle) -> bool {
        dispatch!(self, t => t.open(handle))
    }

    fn close(&mut self) -> bool {
        dispatch!(self, t => t.close())
    }

    fn self_test(&mut self) -> bool {
        dispatch!(self, t => t.self_test())
    }

    fn capture(&mut self, timeout: Duration) -> Result<RawCapture> {
        dispatch!(self, t => t.capture(timeout))
    }

    fn metadata(&mut self) -> DeviceMetadata {
        dispatch!(self, t => t.metadata())
    }

    fn is_open(&self) -> bool {
        dispatch!(self, t => t.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_follows_probe_order() {
        let config = DeviceConfig {
            probe_order: vec![ConnectionType::Serial, ConnectionType::Sdk, ConnectionType::Hid],
            ..DeviceConfig::default()
        };
        let kinds: Vec<_> = AnyTransport::from_config(&config)
            .iter()
            .map(TransportDriver::kind)
            .collect();

        let mut expected = Vec::new();
        if cfg!(feature = "serial") {
            expected.push(ConnectionType::Serial);
        }
        if cfg!(feature = "zkfinger-sdk") {
            expected.push(ConnectionType::Sdk);
        }
        if cfg!(feature = "hid") {
            expected.push(ConnectionType::Hid);
        }
        assert_eq!(kinds, expected);
    }

    #[cfg(all(feature = "hid", feature = "serial"))]
    #[test]
    fn test_default_backends_are_built() {
        let config = DeviceConfig::default();
        assert!(matches!(
            AnyTransport::for_kind(ConnectionType::Hid, &config),
            Some(AnyTransport::Hid(_))
        ));
        assert!(matches!(
            AnyTransport::for_kind(ConnectionType::Serial, &config),
            Some(AnyTransport::Serial(_))
        ));
    }

    #[cfg(not(feature = "zkfinger-sdk"))]
    #[test]
    fn test_sdk_needs_its_feature() {
        assert!(AnyTransport::for_kind(ConnectionType::Sdk, &DeviceConfig::default()).is_none());
    }

    #[test]
    fn test_hardware_transports_start_closed() {
        for transport in AnyTransport::from_config(&DeviceConfig::default()) {
            assert!(!transport.is_open());
        }
    }
}
