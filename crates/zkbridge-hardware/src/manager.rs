//! Device connection manager.
//!
//! The manager owns the single device slot. It probes transports in the
//! configured order, keeps at most one of them open, budgets reconnect
//! attempts and turns every transport outcome into a [`CaptureResult`].
//!
//! # State machine
//!
//! ```text
//!                 connect() ok
//! Disconnected ──────────────────► Connected
//!      ▲   │                          │
//!      │   │ connect() exhausted      │ disconnect()
//!      │   ▼                          │ fatal capture error
//!      └── (stays Disconnected) ◄─────┘
//! ```
//!
//! Timeouts and device status codes leave the session connected. Any other
//! transport error during capture drops the session so the next capture
//! reconnects from scratch.
//!
//! Every method is blocking. [`DeviceService`](crate::service::DeviceService)
//! puts the manager behind a lock and runs it on the blocking pool.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use zkbridge_core::{ClientIdentity, ConnectionType, DeviceConfig};
//! use zkbridge_hardware::manager::ConnectionManager;
//! use zkbridge_hardware::mock::{MockBus, MockReply};
//! use zkbridge_hardware::transport::AnyTransport;
//!
//! let bus = MockBus::new();
//! bus.plug(ConnectionType::Hid, 1);
//! bus.queue_reply(ConnectionType::Hid, MockReply::Frame(vec![0, 90, 0, 0, 0xAB]));
//!
//! let transports = bus
//!     .transports(&ConnectionType::PRIORITY)
//!     .into_iter()
//!     .map(AnyTransport::Mock)
//!     .collect();
//! let mut manager = ConnectionManager::with_transports(
//!     &DeviceConfig::default(),
//!     ClientIdentity::local("bench"),
//!     transports,
//! );
//!
//! assert!(manager.connect());
//! assert_eq!(manager.status().connection_type, Some(ConnectionType::Hid));
//!
//! let result = manager.capture(Duration::from_secs(1));
//! assert!(result.is_success());
//! ```

use crate::frame::normalize_quality;
use crate::reconnect::ReconnectPolicy;
use crate::traits::TransportDriver;
use crate::transport::AnyTransport;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use zkbridge_core::{
    CaptureResult, CaptureSuccess, ClientIdentity, ConnectionType, DeviceConfig, DeviceInfo, FailureKind,
};

/// Result of a connect request, richer than the boolean contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A session was already open; nothing was probed.
    AlreadyConnected(ConnectionType),
    /// A transport opened a new session.
    Connected(ConnectionType),
    /// Every transport was probed and none produced a session.
    NotFound,
    /// The reconnect ceiling is reached; nothing was probed.
    AttemptsExhausted,
}

impl ConnectOutcome {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::AlreadyConnected(_) | Self::Connected(_))
    }

    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::AlreadyConnected(_) => "Already connected to ZK9500",
            Self::Connected(_) => "Connected to ZK9500",
            Self::NotFound => "Failed to connect to ZK9500",
            Self::AttemptsExhausted => "Max reconnection attempts reached",
        }
    }
}

/// Owner of the device slot.
#[derive(Debug)]
pub struct ConnectionManager {
    transports: Vec<AnyTransport>,
    active: Option<usize>,
    info: DeviceInfo,
    reconnect: ReconnectPolicy,
    scan_timeout: Duration,
    status_tx: watch::Sender<DeviceInfo>,
}

impl ConnectionManager {
    /// Manager over the hardware transports named by `config.probe_order`.
    #[must_use]
    pub fn new(config: &DeviceConfig, client: ClientIdentity) -> Self {
        Self::with_transports(config, client, AnyTransport::from_config(config))
    }

    /// Manager over an explicit transport list, probed in list order.
    #[must_use]
    pub fn with_transports(
        config: &DeviceConfig,
        client: ClientIdentity,
        transports: Vec<AnyTransport>,
    ) -> Self {
        let info = DeviceInfo::new(client);
        let (status_tx, _) = watch::channel(info.clone());
        Self {
            transports,
            active: None,
            info,
            reconnect: ReconnectPolicy::new(config.max_reconnect_attempts),
            scan_timeout: config.scan_timeout(),
            status_tx,
        }
    }

    /// Open a session on the first transport that finds and opens a device.
    ///
    /// Returns `true` if a session is open afterwards.
    pub fn connect(&mut self) -> bool {
        self.connect_detailed().is_connected()
    }

    /// [`connect`](Self::connect) with the reason for the outcome.
    pub fn connect_detailed(&mut self) -> ConnectOutcome {
        if let Some(kind) = self.info.connection_type {
            return ConnectOutcome::AlreadyConnected(kind);
        }

        if !self.reconnect.should_attempt() {
            error!(
                attempts = self.reconnect.attempts(),
                "Max reconnection attempts reached"
            );
            return ConnectOutcome::AttemptsExhausted;
        }

        let mut opened = None;
        for (idx, transport) in self.transports.iter_mut().enumerate() {
            let kind = transport.kind();

            let Some(handle) = transport.discover() else {
                info!(transport = %kind, "No device found, trying next transport");
                continue;
            };
            info!(transport = %kind, handle = %handle, "Device discovered");

            if !transport.open(&handle) {
                warn!(transport = %kind, "Open failed, trying next transport");
                continue;
            }

            opened = Some((idx, kind, transport.metadata()));
            break;
        }

        if let Some((idx, kind, metadata)) = opened {
            info!(
                transport = %kind,
                serial = %metadata.serial_number,
                firmware = %metadata.firmware,
                "Connected to ZK9500"
            );
            self.active = Some(idx);
            self.info.mark_connected(kind, metadata);
            self.reconnect.reset();
            self.publish();
            return ConnectOutcome::Connected(kind);
        }

        self.reconnect.record_failure();
        error!(
            attempt = self.reconnect.attempts(),
            ceiling = self.reconnect.ceiling(),
            "No ZK9500 found on any transport"
        );
        ConnectOutcome::NotFound
    }

    /// Close the open session, if any. Counters are kept.
    pub fn disconnect(&mut self) {
        if let Some(idx) = self.active.take()
            && let Some(transport) = self.transports.get_mut(idx)
        {
            let kind = transport.kind();
            if transport.close() {
                info!(transport = %kind, "Disconnected from ZK9500");
            } else {
                warn!(transport = %kind, "Transport reported an error while closing");
            }
        }
        self.info.mark_disconnected();
        self.publish();
    }

    /// Capture one fingerprint, connecting first if needed.
    ///
    /// Never fails with an error: every outcome is a [`CaptureResult`].
    pub fn capture(&mut self, timeout: Duration) -> CaptureResult {
        self.capture_with_cancel(timeout, &CancellationToken::new())
    }

    /// [`capture`](Self::capture) for a caller that may stop waiting.
    ///
    /// If `cancel` fires while the transport is still reading, a template
    /// that arrives afterwards is discarded: no scan is counted and nothing
    /// is published.
    pub fn capture_with_cancel(&mut self, timeout: Duration, cancel: &CancellationToken) -> CaptureResult {
        if !self.info.connected {
            match self.connect_detailed() {
                ConnectOutcome::AttemptsExhausted => {
                    return CaptureResult::failure(
                        FailureKind::AttemptsExhausted,
                        ConnectOutcome::AttemptsExhausted.message(),
                    );
                }
                ConnectOutcome::NotFound => {
                    return CaptureResult::failure(
                        FailureKind::NotConnected,
                        "Device not connected and reconnection failed",
                    );
                }
                ConnectOutcome::Connected(_) | ConnectOutcome::AlreadyConnected(_) => {}
            }
        }

        let Some(transport) = self.active.and_then(|idx| self.transports.get_mut(idx)) else {
            return CaptureResult::failure(FailureKind::NotConnected, "Device not connected");
        };
        let kind = transport.kind();
        info!(transport = %kind, timeout_ms = timeout.as_millis() as u64, "Starting fingerprint capture");

        match transport.capture(timeout) {
            Ok(raw) if cancel.is_cancelled() => {
                warn!(
                    transport = %kind,
                    bytes = raw.template.len(),
                    "Capture finished after the caller gave up, discarding template"
                );
                CaptureResult::failure(FailureKind::Timeout, "No response from device (timeout)")
            }
            Ok(raw) => {
                let quality = normalize_quality(raw.quality);
                let captured_at = Utc::now();
                let scan_count = self.info.record_scan(captured_at);
                info!(
                    transport = %kind,
                    quality,
                    bytes = raw.template.len(),
                    scan_count,
                    "Fingerprint captured"
                );

                let success = CaptureSuccess {
                    template: raw.template,
                    quality,
                    connection_type: kind,
                    device_serial: self.info.serial_number.clone(),
                    firmware: self.info.firmware.clone(),
                    resolution: self.info.resolution.clone(),
                    captured_at,
                    scan_count,
                    client: self.info.client.clone(),
                };
                self.publish();
                CaptureResult::Success(success)
            }
            Err(crate::TransportError::Timeout { duration_ms }) => {
                warn!(transport = %kind, duration_ms, "Capture timed out");
                CaptureResult::failure(FailureKind::Timeout, "No response from device (timeout)")
            }
            Err(crate::TransportError::DeviceStatus { code }) => {
                warn!(transport = %kind, status = code, "Device rejected capture");
                CaptureResult::failure(
                    FailureKind::DeviceStatus(code),
                    format!("Capture failed (Status: {code})"),
                )
            }
            Err(e) => {
                error!(transport = %kind, error = %e, "Capture error, dropping session");
                self.disconnect();
                CaptureResult::failure(FailureKind::Transport, format!("Capture error: {e}"))
            }
        }
    }

    /// Copy of the current status.
    #[must_use]
    pub fn status(&self) -> DeviceInfo {
        self.info.clone()
    }

    /// Receiver that observes every published status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DeviceInfo> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempts()
    }

    /// Default capture timeout from configuration.
    #[must_use]
    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.info.clone());
    }
}
