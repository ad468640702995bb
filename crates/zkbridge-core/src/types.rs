use crate::constants::{MODEL_NAME, RESOLUTION, UNKNOWN};
use crate::identity::ClientIdentity;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical access method bound to the current device session.
///
/// The declaration order is the default probe priority: the vendor SDK
/// exposes the richest metadata, HID is the next most specific and serial is
/// the generic fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Native vendor fingerprint library.
    Sdk,
    /// USB HID reports.
    Hid,
    /// Serial / USB-serial bridge.
    Serial,
}

impl ConnectionType {
    /// Default probe order.
    pub const PRIORITY: [ConnectionType; 3] = [Self::Sdk, Self::Hid, Self::Serial];

    /// Wire name (`sdk`, `hid`, `serial`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sdk => "sdk",
            Self::Hid => "hid",
            Self::Serial => "serial",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sdk" => Ok(Self::Sdk),
            "hid" => Ok(Self::Hid),
            "serial" => Ok(Self::Serial),
            other => Err(Error::UnknownConnectionType(other.to_string())),
        }
    }
}

/// Metadata a transport reports after opening a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub model: String,
    pub serial_number: String,
    pub firmware: String,
    pub device_count: u32,
}

impl Default for DeviceMetadata {
    fn default() -> Self {
        Self {
            model: MODEL_NAME.to_string(),
            serial_number: UNKNOWN.to_string(),
            firmware: UNKNOWN.to_string(),
            device_count: 1,
        }
    }
}

/// Status snapshot of the single device slot.
///
/// The connection manager is the only writer. Everyone else receives clones,
/// so holding a `DeviceInfo` never observes later mutations.
///
/// `connection_type` is `Some` exactly when `connected` is `true`; the
/// mutators below are the only way the manager changes either field.
///
/// # Examples
///
/// ```
/// use zkbridge_core::{ClientIdentity, ConnectionType, DeviceInfo, DeviceMetadata};
///
/// let mut info = DeviceInfo::new(ClientIdentity::local("bench"));
/// assert!(!info.connected);
///
/// info.mark_connected(ConnectionType::Serial, DeviceMetadata::default());
/// assert_eq!(info.connection_type, Some(ConnectionType::Serial));
///
/// info.mark_disconnected();
/// assert_eq!(info.connection_type, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: String,
    pub serial_number: String,
    pub firmware: String,
    pub resolution: String,
    pub connected: bool,
    pub connection_type: Option<ConnectionType>,
    pub device_count: u32,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub total_scans: u64,
    pub client: ClientIdentity,
}

impl DeviceInfo {
    /// Disconnected snapshot for the given host identity.
    #[must_use]
    pub fn new(client: ClientIdentity) -> Self {
        Self {
            model: MODEL_NAME.to_string(),
            serial_number: UNKNOWN.to_string(),
            firmware: UNKNOWN.to_string(),
            resolution: RESOLUTION.to_string(),
            connected: false,
            connection_type: None,
            device_count: 0,
            last_scan_time: None,
            total_scans: 0,
            client,
        }
    }

    /// Bind the slot to `kind` and adopt the metadata it reported.
    pub fn mark_connected(&mut self, kind: ConnectionType, metadata: DeviceMetadata) {
        self.connected = true;
        self.connection_type = Some(kind);
        self.model = metadata.model;
        self.serial_number = metadata.serial_number;
        self.firmware = metadata.firmware;
        self.device_count = metadata.device_count;
    }

    /// Clear the session flags. Counters and cached metadata are kept.
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.connection_type = None;
    }

    /// Count one successful scan and return its sequence number.
    pub fn record_scan(&mut self, at: DateTime<Utc>) -> u64 {
        self.total_scans += 1;
        self.last_scan_time = Some(at);
        self.total_scans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn info() -> DeviceInfo {
        DeviceInfo::new(ClientIdentity::local("test-host"))
    }

    #[rstest]
    #[case("sdk", ConnectionType::Sdk)]
    #[case("HID", ConnectionType::Hid)]
    #[case(" serial ", ConnectionType::Serial)]
    fn test_connection_type_parse(#[case] input: &str, #[case] expected: ConnectionType) {
        assert_eq!(input.parse::<ConnectionType>().unwrap(), expected);
    }

    #[test]
    fn test_connection_type_parse_rejects_unknown() {
        let err = "usb".parse::<ConnectionType>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown connection type: usb");
    }

    #[test]
    fn test_connection_type_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionType::Serial).unwrap();
        assert_eq!(json, "\"serial\"");
        assert_eq!(ConnectionType::Hid.to_string(), "hid");
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(
            ConnectionType::PRIORITY,
            [ConnectionType::Sdk, ConnectionType::Hid, ConnectionType::Serial]
        );
    }

    #[test]
    fn test_new_info_is_disconnected() {
        let info = info();
        assert!(!info.connected);
        assert_eq!(info.connection_type, None);
        assert_eq!(info.total_scans, 0);
        assert_eq!(info.resolution, RESOLUTION);
    }

    #[test]
    fn test_connect_disconnect_keeps_invariant() {
        let mut info = info();
        let metadata = DeviceMetadata {
            model: "ZK9500 (SDK)".into(),
            serial_number: "ZK1234".into(),
            firmware: "SDK v10.0".into(),
            device_count: 2,
        };

        info.mark_connected(ConnectionType::Sdk, metadata);
        assert!(info.connected);
        assert_eq!(info.connection_type, Some(ConnectionType::Sdk));
        assert_eq!(info.device_count, 2);
        assert_eq!(info.serial_number, "ZK1234");

        info.mark_disconnected();
        assert!(!info.connected);
        assert_eq!(info.connection_type, None);
        assert_eq!(info.serial_number, "ZK1234");
    }

    #[test]
    fn test_record_scan_is_monotonic() {
        let mut info = info();
        let now = Utc::now();
        assert_eq!(info.record_scan(now), 1);
        assert_eq!(info.record_scan(now), 2);
        assert_eq!(info.last_scan_time, Some(now));
    }

    #[test]
    fn test_disconnect_keeps_scan_counter() {
        let mut info = info();
        info.mark_connected(ConnectionType::Hid, DeviceMetadata::default());
        info.record_scan(Utc::now());
        info.mark_disconnected();
        assert_eq!(info.total_scans, 1);
    }
}
