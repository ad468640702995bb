//! Command dispatcher shared by both front-ends.
//!
//! A decoded command maps onto exactly one [`DeviceService`] call. The
//! dispatcher returns typed outcomes; each front-end renders them into its
//! own envelope (JSON frames for the channel, JSON bodies with status codes
//! for the request/response API).
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use zkbridge_network::dispatcher::Command;
//!
//! let command = Command::parse(&json!({"command": "capture_fingerprint", "timeout": 5})).unwrap();
//! assert_eq!(command.name(), "capture");
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use zkbridge_core::constants::{MAX_CAPTURE_TIMEOUT_SECS, SERVICE_VERSION};
use zkbridge_core::{CaptureResult, CaptureSuccess, ConnectionType, DeviceInfo};
use zkbridge_hardware::{ConnectOutcome, DeviceService, ServiceError};

/// Recognized commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Health probe; always succeeds.
    Test,
    Connect,
    Disconnect,
    /// Capture with an optional per-request timeout.
    Capture { timeout: Option<Duration> },
    Status,
}

impl Command {
    /// Decode a `{command, ...params}` object.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidJson`] if `value` is not an object,
    /// [`DispatchError::UnknownCommand`] for unrecognized names and
    /// [`DispatchError::InvalidParameter`] for a malformed `timeout`.
    pub fn parse(value: &Value) -> Result<Self, DispatchError> {
        let Some(object) = value.as_object() else {
            return Err(DispatchError::InvalidJson);
        };
        let name = object.get("command").and_then(Value::as_str).unwrap_or_default();

        match name {
            "test" => Ok(Self::Test),
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "status" => Ok(Self::Status),
            "capture" | "capture_fingerprint" => {
                let timeout = match object.get("timeout") {
                    None | Some(Value::Null) => None,
                    Some(Value::Number(n)) => n.as_f64(),
                    Some(other) => {
                        return Err(DispatchError::InvalidParameter(format!(
                            "timeout must be a number of seconds, got {other}"
                        )));
                    }
                };
                Ok(Self::Capture {
                    timeout: capture_timeout(timeout)?,
                })
            }
            other => Err(DispatchError::UnknownCommand(other.to_string())),
        }
    }

    /// Canonical command name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Capture { .. } => "capture",
            Self::Status => "status",
        }
    }
}

/// Validate a client-supplied capture timeout in seconds.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidParameter`] unless `0 < secs <= 300`.
pub fn capture_timeout(secs: Option<f64>) -> Result<Option<Duration>, DispatchError> {
    match secs {
        None => Ok(None),
        Some(s) if s.is_finite() && s > 0.0 && s <= MAX_CAPTURE_TIMEOUT_SECS => {
            Ok(Some(Duration::from_secs_f64(s)))
        }
        Some(s) => Err(DispatchError::InvalidParameter(format!(
            "timeout must be between 0 and {MAX_CAPTURE_TIMEOUT_SECS} seconds, got {s}"
        ))),
    }
}

/// Reasons a request never reached the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Typed result of one dispatched command.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Test { device: DeviceInfo, server: ServerInfo },
    Connect { outcome: ConnectOutcome, device: DeviceInfo },
    Disconnect,
    Capture(CaptureResult),
    Status { device: DeviceInfo, server: ServerInfo },
}

/// Server identity block embedded in `test`, `status` and welcome frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub hostname: String,
    pub ip: IpAddr,
    pub platform: &'static str,
    pub service_version: &'static str,
    pub connected_clients: usize,
    pub uptime_secs: u64,
    pub device_connected: bool,
}

/// Capture metadata common to both front-ends.
///
/// The template itself is left out; the channel carries it as a byte array
/// and the request/response API as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureFields {
    pub message: String,
    pub quality: u8,
    pub connection_type: ConnectionType,
    pub device_serial: String,
    pub firmware: String,
    pub resolution: String,
    pub timestamp: DateTime<Utc>,
    pub scan_count: u64,
    pub client_hostname: String,
    pub client_ip: IpAddr,
}

impl From<&CaptureSuccess> for CaptureFields {
    fn from(capture: &CaptureSuccess) -> Self {
        Self {
            message: format!("Fingerprint captured successfully (quality {}%)", capture.quality),
            quality: capture.quality,
            connection_type: capture.connection_type,
            device_serial: capture.device_serial.clone(),
            firmware: capture.firmware.clone(),
            resolution: capture.resolution.clone(),
            timestamp: capture.captured_at,
            scan_count: capture.scan_count,
            client_hostname: capture.client.hostname.clone(),
            client_ip: capture.client.ip,
        }
    }
}

/// Decrements the connected-client count when dropped.
#[derive(Debug)]
pub struct ClientGuard {
    clients: Arc<AtomicUsize>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Maps commands onto the shared device service.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    service: DeviceService,
    clients: Arc<AtomicUsize>,
    started: Instant,
}

impl Dispatcher {
    #[must_use]
    pub fn new(service: DeviceService) -> Self {
        Self {
            service,
            clients: Arc::new(AtomicUsize::new(0)),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &DeviceService {
        &self.service
    }

    /// Count a channel client for as long as the guard lives.
    #[must_use]
    pub fn register_client(&self) -> ClientGuard {
        self.clients.fetch_add(1, Ordering::SeqCst);
        ClientGuard {
            clients: Arc::clone(&self.clients),
        }
    }

    #[must_use]
    pub fn connected_clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn server_info(&self) -> ServerInfo {
        let status = self.service.status();
        ServerInfo {
            hostname: status.client.hostname,
            ip: status.client.ip,
            platform: std::env::consts::OS,
            service_version: SERVICE_VERSION,
            connected_clients: self.connected_clients(),
            uptime_secs: self.started.elapsed().as_secs(),
            device_connected: status.connected,
        }
    }

    /// Run one command against the device service.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when a connect or disconnect worker fails or
    /// outlives its budget. Capture failures are values inside
    /// [`CommandOutcome::Capture`].
    pub async fn dispatch(&self, command: Command) -> Result<CommandOutcome, ServiceError> {
        debug!(command = command.name(), "Dispatching command");

        match command {
            Command::Test => Ok(CommandOutcome::Test {
                device: self.service.status(),
                server: self.server_info(),
            }),
            Command::Connect => {
                let outcome = self.service.connect().await?;
                info!(outcome = ?outcome, "Connect request finished");
                Ok(CommandOutcome::Connect {
                    outcome,
                    device: self.service.status(),
                })
            }
            Command::Disconnect => {
                self.service.disconnect().await?;
                Ok(CommandOutcome::Disconnect)
            }
            Command::Capture { timeout } => {
                let result = self.service.capture(timeout).await;
                match &result {
                    CaptureResult::Success(s) => {
                        info!(quality = s.quality, scan_count = s.scan_count, "Capture succeeded");
                    }
                    CaptureResult::Failure(f) => info!(reason = %f, "Capture failed"),
                }
                Ok(CommandOutcome::Capture(result))
            }
            Command::Status => Ok(CommandOutcome::Status {
                device: self.service.status(),
                server: self.server_info(),
            }),
        }
    }
}
