//! Shared data model for the zkbridge fingerprint bridge.
//!
//! Everything that crosses a crate boundary lives here: the device status
//! snapshot ([`DeviceInfo`]), the normalized capture outcome
//! ([`CaptureResult`]), the bridge configuration ([`BridgeConfig`]) and the
//! wire constants shared by the transport drivers.

pub mod capture;
pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod types;

pub use capture::{CaptureFailure, CaptureResult, CaptureSuccess, FailureKind};
pub use config::{ApiConfig, BridgeConfig, DeviceConfig, HidDeviceId, IdentityConfig, WebSocketConfig};
pub use error::{Error, Result};
pub use identity::ClientIdentity;
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
