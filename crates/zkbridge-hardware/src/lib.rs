//! Device access layer for the ZK9500 fingerprint bridge.
//!
//! The crate is organized bottom-up:
//!
//! - [`frame`]: reply parsing shared by the HID and serial links
//! - [`traits::TransportDriver`]: the five blocking primitives every
//!   transport implements (`discover`, `open`, `close`, `self_test`,
//!   `capture`)
//! - [`transport`]: the SDK, HID and serial drivers behind cargo features,
//!   plus the [`AnyTransport`](transport::AnyTransport) dispatch enum
//! - [`mock`]: a simulated bus for tests and hardware-free development
//! - [`reconnect::ReconnectPolicy`]: consecutive-failure budgeting
//! - [`manager::ConnectionManager`]: the single device slot
//! - [`service::DeviceService`]: the async, lock-serialized handle the
//!   network front-ends share
//!
//! # Error Handling
//!
//! Drivers report failures as [`TransportError`] values. The manager
//! classifies them and never lets one escape: callers only ever see
//! [`CaptureResult`](zkbridge_core::CaptureResult) and
//! [`ConnectOutcome`](manager::ConnectOutcome) values.
//!
//! # Example
//!
//! ```no_run
//! use zkbridge_core::{BridgeConfig, ClientIdentity};
//! use zkbridge_hardware::manager::ConnectionManager;
//! use zkbridge_hardware::service::DeviceService;
//!
//! # async fn example() {
//! let config = BridgeConfig::default();
//! let manager = ConnectionManager::new(&config.device, ClientIdentity::resolve(None));
//! let service = DeviceService::new(manager, &config.device);
//!
//! let result = service.capture(None).await;
//! println!("{}", result.message());
//! # }
//! ```

pub mod error;
pub mod frame;
pub mod manager;
pub mod mock;
pub mod reconnect;
pub mod service;
pub mod traits;
pub mod transport;

pub use error::{Result, TransportError};
pub use manager::{ConnectOutcome, ConnectionManager};
pub use service::{DeviceService, ServiceError};
