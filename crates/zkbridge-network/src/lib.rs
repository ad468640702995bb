//! Network front-ends for the zkbridge fingerprint bridge.
//!
//! Two protocols share one [`Dispatcher`] and therefore one device slot:
//!
//! - **[`WsServer`]**: persistent JSON channel, one task per client
//! - **[`http`]**: request/response JSON API built on axum
//!
//! A `connect` issued through either front-end is immediately visible as
//! `connected: true` through the other, since both read the same
//! [`DeviceService`](zkbridge_hardware::DeviceService) snapshot.
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use zkbridge_core::{BridgeConfig, ClientIdentity};
//! use zkbridge_hardware::{ConnectionManager, DeviceService};
//! use zkbridge_network::{Dispatcher, WsServer, http};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::default();
//! let manager = ConnectionManager::new(&config.device, ClientIdentity::resolve(None));
//! let dispatcher = Dispatcher::new(DeviceService::new(manager, &config.device));
//! let shutdown = CancellationToken::new();
//!
//! let ws = WsServer::bind(&config.websocket, dispatcher.clone()).await?;
//! let api = config.api.clone();
//! let api_shutdown = shutdown.clone();
//! tokio::spawn(async move { http::serve(&api, dispatcher, api_shutdown).await });
//! ws.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod http;
pub mod ws;

pub use dispatcher::{Command, CommandOutcome, DispatchError, Dispatcher, ServerInfo};
pub use http::{ApiError, build_router};
pub use ws::{WsServer, WsServerError};
