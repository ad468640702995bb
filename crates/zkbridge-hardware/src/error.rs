//! Error types for transport operations.
//!
//! Transport errors never leave the connection manager: it classifies each
//! one and converts it into a capture failure value. The classification is
//! what matters here:
//!
//! - [`TransportError::Timeout`] keeps the session open
//! - [`TransportError::DeviceStatus`] keeps the session open
//! - everything else is fatal and forces a disconnect

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by a transport driver.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No usable response arrived within the capture budget.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The device answered with a nonzero status code.
    #[error("Device reported status {code}")]
    DeviceStatus { code: i32 },

    /// The transport has no open link.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Backend is not compiled in or its native library is unusable.
    #[error("Transport unavailable: {reason}")]
    Unavailable { reason: String },

    /// Link-level read/write failure.
    #[error("Communication error: {message}")]
    Communication { message: String },

    /// Response bytes could not be interpreted.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new device status error.
    pub fn device_status(code: i32) -> Self {
        Self::DeviceStatus { code }
    }

    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Whether the session must be dropped after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Timeout { .. } | Self::DeviceStatus { .. })
    }
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(kind) => Self::Io(std::io::Error::new(kind, e.description)),
            _ => Self::communication(e.description),
        }
    }
}

#[cfg(feature = "hid")]
impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        Self::communication(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error() {
        let error = TransportError::timeout(15000);
        assert!(matches!(error, TransportError::Timeout { .. }));
        assert_eq!(error.to_string(), "Operation timeout after 15000ms");
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_device_status_is_not_fatal() {
        let error = TransportError::device_status(1);
        assert_eq!(error.to_string(), "Device reported status 1");
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_link_errors_are_fatal() {
        let errors = vec![
            TransportError::disconnected("COM3"),
            TransportError::communication("write failed"),
            TransportError::invalid_data("short frame"),
            TransportError::unavailable("hid support not compiled in"),
            TransportError::from(std::io::Error::other("broken pipe")),
        ];

        for error in errors {
            assert!(error.is_fatal(), "{error} should be fatal");
        }
    }
}
