//! Normalized capture outcome.
//!
//! Every transport produces the same [`CaptureResult`]. Hardware faults,
//! protocol errors and timeouts all become [`CaptureFailure`] values so the
//! front-ends never see a transport error directly.

use crate::identity::ClientIdentity;
use crate::types::ConnectionType;
use chrono::{DateTime, Utc};
use std::fmt;

/// Outcome of one capture request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureResult {
    Success(CaptureSuccess),
    Failure(CaptureFailure),
}

impl CaptureResult {
    /// Build a failure result.
    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(CaptureFailure {
            kind,
            message: message.into(),
        })
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Human-readable summary suitable for a response `message` field.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Success(s) => format!("Fingerprint captured successfully (quality {}%)", s.quality),
            Self::Failure(f) => f.message.clone(),
        }
    }
}

/// A template read from the device together with the session snapshot it
/// was taken under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSuccess {
    /// Opaque template bytes, possibly empty.
    pub template: Vec<u8>,
    /// Quality score in `0..=100`.
    pub quality: u8,
    pub connection_type: ConnectionType,
    pub device_serial: String,
    pub firmware: String,
    pub resolution: String,
    pub captured_at: DateTime<Utc>,
    /// Scan sequence number, strictly increasing over the process lifetime.
    pub scan_count: u64,
    pub client: ClientIdentity,
}

impl CaptureSuccess {
    /// Template length in bytes.
    #[must_use]
    pub fn template_len(&self) -> usize {
        self.template.len()
    }
}

/// Why a capture did not produce a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No session, and the implicit reconnect failed.
    NotConnected,
    /// The reconnect ceiling short-circuited the implicit connect.
    AttemptsExhausted,
    /// The device did not answer within the capture budget.
    Timeout,
    /// The device answered with a nonzero status byte.
    DeviceStatus(i32),
    /// The link failed mid-capture; the session was dropped.
    Transport,
    /// The worker running the capture could not report back.
    Internal,
}

impl FailureKind {
    /// Device status code, if the device reported one.
    #[must_use]
    pub fn status_code(self) -> Option<i32> {
        match self {
            Self::DeviceStatus(code) => Some(code),
            _ => None,
        }
    }
}

/// Failure variant of [`CaptureResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_constructor() {
        let result = CaptureResult::failure(FailureKind::DeviceStatus(3), "Capture failed (Status: 3)");
        assert!(!result.is_success());
        assert_eq!(result.message(), "Capture failed (Status: 3)");

        let CaptureResult::Failure(failure) = result else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind.status_code(), Some(3));
        assert_eq!(failure.to_string(), "Capture failed (Status: 3)");
    }

    #[test]
    fn test_status_code_only_for_device_status() {
        assert_eq!(FailureKind::Timeout.status_code(), None);
        assert_eq!(FailureKind::Transport.status_code(), None);
    }

    #[test]
    fn test_success_message_reports_quality() {
        let result = CaptureResult::Success(CaptureSuccess {
            template: vec![1, 2, 3],
            quality: 85,
            connection_type: ConnectionType::Serial,
            device_serial: "ZK42".into(),
            firmware: "v1.2".into(),
            resolution: "500 DPI".into(),
            captured_at: Utc::now(),
            scan_count: 1,
            client: ClientIdentity::local("host"),
        });
        assert!(result.is_success());
        assert!(result.message().contains("85%"));
    }
}
