//! Async boundary around the connection manager.
//!
//! Both front-ends share one [`DeviceService`]. State-changing calls take a
//! fair (FIFO) async mutex, then run the blocking manager call on tokio's
//! blocking pool, so a multi-second capture never stalls the event loop.
//! Status reads skip the lock and read the last published snapshot.
//!
//! ```text
//! ws handler ──┐                       ┌──────────────────────┐
//!              ├─► Mutex (FIFO) ──────►│ spawn_blocking       │
//! http handler ┘                       │  ConnectionManager   │
//!                                      └──────────┬───────────┘
//! status() ◄──────── watch::Receiver ◄────────────┘ publish
//! ```
//!
//! The caller's wait is bounded by a timeout, but the worker itself is
//! never interrupted: once a capture reaches the hardware it runs until the
//! transport's own poll loop gives up, and only then releases the lock. A
//! capture whose caller already gave up is flagged through a
//! [`CancellationToken`], so a late template is dropped instead of being
//! counted as a scan nobody received.

use crate::manager::{ConnectOutcome, ConnectionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use zkbridge_core::{CaptureResult, DeviceConfig, DeviceInfo, FailureKind};

/// Errors at the worker boundary.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The caller stopped waiting; the worker may still be running.
    #[error("Device operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The blocking task panicked or was cancelled.
    #[error("Device worker failed: {0}")]
    Worker(String),
}

/// Shared, cloneable handle to the device slot.
///
/// # Examples
///
/// ```
/// use zkbridge_core::{ClientIdentity, ConnectionType, DeviceConfig};
/// use zkbridge_hardware::manager::ConnectionManager;
/// use zkbridge_hardware::mock::MockBus;
/// use zkbridge_hardware::service::DeviceService;
/// use zkbridge_hardware::transport::AnyTransport;
///
/// #[tokio::main]
/// async fn main() {
///     let bus = MockBus::new();
///     bus.plug(ConnectionType::Serial, 1);
///
///     let config = DeviceConfig::default();
///     let transports = vec![AnyTransport::Mock(bus.transport(ConnectionType::Serial))];
///     let manager =
///         ConnectionManager::with_transports(&config, ClientIdentity::local("bench"), transports);
///     let service = DeviceService::new(manager, &config);
///
///     let outcome = service.connect().await.unwrap();
///     assert!(outcome.is_connected());
///     assert!(service.status().connected);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DeviceService {
    manager: Arc<Mutex<ConnectionManager>>,
    status_rx: watch::Receiver<DeviceInfo>,
    scan_timeout: Duration,
    worker_grace: Duration,
    connect_timeout: Duration,
}

impl DeviceService {
    #[must_use]
    pub fn new(manager: ConnectionManager, config: &DeviceConfig) -> Self {
        let status_rx = manager.subscribe();
        Self {
            scan_timeout: manager.scan_timeout(),
            manager: Arc::new(Mutex::new(manager)),
            status_rx,
            worker_grace: config.worker_grace(),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Last published status snapshot. Never waits for the device lock.
    #[must_use]
    pub fn status(&self) -> DeviceInfo {
        self.status_rx.borrow().clone()
    }

    /// Receiver that observes every published status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DeviceInfo> {
        self.status_rx.clone()
    }

    /// Capture timeout used when a request does not name one.
    #[must_use]
    pub fn default_scan_timeout(&self) -> Duration {
        self.scan_timeout
    }

    /// # Errors
    ///
    /// Returns [`ServiceError`] if the probe outlives the connect timeout
    /// or the worker fails.
    pub async fn connect(&self) -> Result<ConnectOutcome, ServiceError> {
        self.run(self.connect_timeout, ConnectionManager::connect_detailed)
            .await
    }

    /// # Errors
    ///
    /// Returns [`ServiceError`] if the worker fails or does not finish in
    /// time.
    pub async fn disconnect(&self) -> Result<(), ServiceError> {
        self.run(self.connect_timeout, ConnectionManager::disconnect)
            .await
    }

    /// Capture one fingerprint. Worker failures become failure results.
    pub async fn capture(&self, timeout: Option<Duration>) -> CaptureResult {
        let timeout = timeout.unwrap_or(self.scan_timeout);
        let budget = timeout.saturating_add(self.worker_grace);
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();

        match self
            .run(budget, move |m| m.capture_with_cancel(timeout, &worker_cancel))
            .await
        {
            Ok(result) => result,
            Err(ServiceError::Timeout { duration_ms }) => {
                cancel.cancel();
                warn!(duration_ms, "Gave up waiting for capture worker");
                CaptureResult::failure(FailureKind::Timeout, "No response from device (timeout)")
            }
            Err(e) => CaptureResult::failure(FailureKind::Internal, format!("Capture error: {e}")),
        }
    }

    /// Run `op` against the manager on the blocking pool, one at a time.
    ///
    /// `budget` starts once the lock is held, so queued requests are not
    /// charged for the requests ahead of them.
    async fn run<T, F>(&self, budget: Duration, op: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ConnectionManager) -> T + Send + 'static,
    {
        let mut guard = Arc::clone(&self.manager).lock_owned().await;
        let task = tokio::task::spawn_blocking(move || op(&mut *guard));

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(error = %e, "Device worker failed");
                Err(ServiceError::Worker(e.to_string()))
            }
            Err(_) => Err(ServiceError::Timeout {
                duration_ms: budget.as_millis() as u64,
            }),
        }
    }
}
