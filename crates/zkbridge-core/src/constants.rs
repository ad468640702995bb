//! Wire constants and defaults for the ZK9500 bridge.
//!
//! The scanner speaks a tiny command protocol over HID and serial links:
//!
//! ```text
//! request:  [CMD, SUB, 0x00, 0x00]            (HID: zero-padded to 64 bytes)
//! response: [STATUS, QUALITY, RSV, RSV, TEMPLATE...]
//! ```
//!
//! | Command | Bytes | Purpose |
//! |---------|-------|---------|
//! | Link test / info | `01 00 00 00` | Liveness probe; reply carries serial and firmware |
//! | Capture | `02 01 00 00` | Acquire one fingerprint template |
//!
//! A status byte of `0x00` means success. Every other value is a
//! device-reported failure code.
//!
//! # Usage
//!
//! ```
//! use zkbridge_core::constants::*;
//!
//! assert_eq!(CAPTURE_COMMAND[0], 0x02);
//! assert_eq!(HID_REPORT_LEN, 64);
//! assert!(DEFAULT_MAX_RECONNECT_ATTEMPTS > 0);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

// ============================================================================
// Device Identity
// ============================================================================

/// Base model name reported for HID and serial sessions.
pub const MODEL_NAME: &str = "ZK9500";

/// Model name reported when the vendor SDK owns the session.
pub const SDK_MODEL_NAME: &str = "ZK9500 (SDK)";

/// Firmware label reported for SDK sessions (the SDK does not expose one).
pub const SDK_FIRMWARE: &str = "SDK v10.0";

/// Optical sensor resolution.
pub const RESOLUTION: &str = "500 DPI";

/// Placeholder for metadata the device has not reported.
pub const UNKNOWN: &str = "unknown";

// ============================================================================
// Command Frames
// ============================================================================

/// Link test and info query.
pub const LINK_TEST_COMMAND: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Fingerprint capture request.
pub const CAPTURE_COMMAND: [u8; 4] = [0x02, 0x01, 0x00, 0x00];

/// Status byte value signalling success.
pub const STATUS_OK: u8 = 0x00;

/// Offset of the first template byte in a capture response.
pub const TEMPLATE_OFFSET: usize = 4;

/// Shortest response that still carries a status and quality byte.
pub const MIN_FRAME_LEN: usize = 4;

/// Minimum info response length needed to read the serial number.
pub const INFO_SERIAL_LEN: usize = 8;

/// HID report size used for both writes and reads.
pub const HID_REPORT_LEN: usize = 64;

// ============================================================================
// Vendor SDK Buffers
// ============================================================================

/// Raw image buffer handed to the SDK capture call (640 x 480 grayscale).
pub const SDK_IMAGE_BUFFER_LEN: usize = 640 * 480;

/// Template buffer handed to the SDK capture call.
pub const SDK_TEMPLATE_BUFFER_LEN: usize = 2048;

// ============================================================================
// Quality
// ============================================================================

/// Maximum quality score (inclusive).
pub const MAX_QUALITY_SCORE: u8 = 100;

/// Quality assigned to captures whose transport reports none.
pub const UNREPORTED_QUALITY: u8 = MAX_QUALITY_SCORE;

// ============================================================================
// Defaults
// ============================================================================

/// Consecutive failed connects before further attempts short-circuit.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Capture timeout in seconds.
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 15;

/// Extra time a caller waits for the device worker beyond the capture
/// timeout before giving up on it (seconds).
pub const DEFAULT_WORKER_GRACE_SECS: u64 = 5;

/// Longest a caller waits for a full connect probe (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Read poll interval while waiting for a capture response (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Bytes the capture poll loop waits for before parsing.
pub const DEFAULT_MIN_RESPONSE_LEN: usize = 8;

/// Settle delay between a serial link test write and its read (milliseconds).
pub const DEFAULT_SERIAL_TEST_DELAY_MS: u64 = 500;

/// Settle delay between a HID link test write and its read (milliseconds).
pub const DEFAULT_HID_TEST_DELAY_MS: u64 = 100;

/// Per-read serial port timeout (milliseconds).
pub const DEFAULT_SERIAL_READ_TIMEOUT_MS: u64 = 3000;

/// Baud rates tried in order when no rate is configured.
pub const DEFAULT_BAUD_RATES: [u32; 5] = [9600, 115200, 57600, 38400, 19200];

/// Baud rate used to test-open a configured fallback port.
pub const FALLBACK_TEST_BAUD: u32 = 9600;

/// Highest `COMn`/`ttySn` index tried by brute-force port probing.
pub const DEFAULT_PROBE_PORT_LIMIT: u32 = 20;

/// USB vendor IDs of ZKTeco scanners and their common USB-serial bridges.
pub const DEFAULT_SERIAL_VENDOR_IDS: [u16; 4] = [0x1b55, 0x2808, 0x1a86, 0x0403];

/// Port description keywords that mark a likely scanner.
pub const DEFAULT_SERIAL_KEYWORDS: [&str; 4] = ["zk", "fingerprint", "biometric", "zkteco"];

/// Known HID vendor/product pairs, probed in order.
pub const DEFAULT_HID_DEVICES: [(u16, u16); 5] = [
    (0x1b55, 0x0124),
    (0x1b55, 0x0010),
    (0x1b55, 0x0020),
    (0x2808, 0x0001),
    (0x1a86, 0x0001),
];

/// Address the identity probe routes toward (start of the CGNAT overlay range).
pub const OVERLAY_PROBE_ADDR: &str = "100.64.0.1:80";

/// Default WebSocket listen address.
pub const DEFAULT_WS_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8765);

/// Default WebSocket path.
pub const DEFAULT_WS_PATH: &str = "/zk9500";

/// Default HTTP API listen address.
pub const DEFAULT_API_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080);

/// Largest capture timeout a client may request (seconds).
pub const MAX_CAPTURE_TIMEOUT_SECS: f64 = 300.0;

/// Upper bound for every configured device timeout (seconds).
pub const MAX_DEVICE_TIMEOUT_SECS: u64 = 300;

/// Upper bound for the capture poll interval (milliseconds).
pub const MAX_POLL_INTERVAL_MS: u64 = 1000;

/// Version reported to clients in `server_info`.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frames_fit_in_hid_report() {
        assert!(LINK_TEST_COMMAND.len() <= HID_REPORT_LEN);
        assert!(CAPTURE_COMMAND.len() <= HID_REPORT_LEN);
    }

    #[test]
    fn test_template_follows_header() {
        assert_eq!(TEMPLATE_OFFSET, MIN_FRAME_LEN);
        assert!(DEFAULT_MIN_RESPONSE_LEN >= MIN_FRAME_LEN);
    }

    #[test]
    fn test_device_timeout_cap_matches_client_cap() {
        assert_eq!(MAX_DEVICE_TIMEOUT_SECS as f64, MAX_CAPTURE_TIMEOUT_SECS);
        assert!(DEFAULT_SCAN_TIMEOUT_SECS <= MAX_DEVICE_TIMEOUT_SECS);
        assert!(DEFAULT_CONNECT_TIMEOUT_SECS <= MAX_DEVICE_TIMEOUT_SECS);
        assert!((1..=MAX_POLL_INTERVAL_MS).contains(&DEFAULT_POLL_INTERVAL_MS));
    }

    #[test]
    fn test_default_baud_rates_are_distinct() {
        let mut rates = DEFAULT_BAUD_RATES.to_vec();
        rates.sort_unstable();
        rates.dedup();
        assert_eq!(rates.len(), DEFAULT_BAUD_RATES.len());
    }
}
