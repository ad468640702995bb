//! Response framing shared by the HID and serial transports.
//!
//! Both links carry the same reply layout:
//!
//! ```text
//! byte 0     status   (0x00 = success)
//! byte 1     quality  (raw, may exceed 100)
//! bytes 2-3  reserved
//! bytes 4..  template
//! ```
//!
//! HID replies arrive in 64-byte reports and serial replies in arbitrary
//! chunks; [`poll_response`] hides that difference by accumulating whatever
//! each read returns.

use crate::{Result, TransportError};
use bytes::BytesMut;
use std::time::{Duration, Instant};
use tracing::warn;
use zkbridge_core::DeviceMetadata;
use zkbridge_core::constants::{
    INFO_SERIAL_LEN, MAX_QUALITY_SCORE, MIN_FRAME_LEN, STATUS_OK, TEMPLATE_OFFSET, UNREPORTED_QUALITY,
};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Template and raw quality as read from a transport.
///
/// `quality` is `None` when the transport does not report one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCapture {
    pub template: Vec<u8>,
    pub quality: Option<u8>,
}

/// Clamp a raw quality byte into `0..=100`. Missing quality counts as 100.
#[must_use]
pub fn normalize_quality(quality: Option<u8>) -> u8 {
    quality.map_or(UNREPORTED_QUALITY, |q| q.min(MAX_QUALITY_SCORE))
}

/// Read until `min_len` bytes have accumulated or `timeout` elapses.
///
/// `read_chunk` appends whatever is currently available to the buffer and
/// may append nothing. Its errors abort the poll immediately. A timeout too
/// large to form a deadline never expires, and the interval is at least
/// one millisecond.
///
/// # Errors
///
/// Propagates the first error returned by `read_chunk`.
pub fn poll_response<F>(
    mut read_chunk: F,
    min_len: usize,
    timeout: Duration,
    interval: Duration,
) -> Result<BytesMut>
where
    F: FnMut(&mut BytesMut) -> Result<()>,
{
    let deadline = Instant::now().checked_add(timeout);
    let interval = interval.max(MIN_POLL_INTERVAL);
    let mut buf = BytesMut::with_capacity(min_len.max(64));

    loop {
        read_chunk(&mut buf)?;
        if buf.len() >= min_len || deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(buf);
        }
        std::thread::sleep(interval);
    }
}

/// Parse an accumulated capture reply.
///
/// # Errors
///
/// - [`TransportError::Timeout`] if fewer than four bytes arrived
/// - [`TransportError::DeviceStatus`] for a nonzero status byte
pub fn parse_capture_response(response: &[u8], timeout: Duration) -> Result<RawCapture> {
    if response.len() < MIN_FRAME_LEN {
        return Err(TransportError::timeout(timeout.as_millis() as u64));
    }

    let status = response[0];
    if status != STATUS_OK {
        return Err(TransportError::device_status(i32::from(status)));
    }

    Ok(RawCapture {
        template: response[TEMPLATE_OFFSET..].to_vec(),
        quality: Some(response[1]),
    })
}

/// Serial number and firmware carried by an info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoReply {
    pub serial_number: String,
    pub firmware: Option<String>,
}

/// Parse a reply to the info command.
///
/// Bytes 4..8 hold the serial number (little-endian), bytes 8 and 9 the
/// firmware major/minor. Returns `None` for replies too short to carry a
/// serial number.
#[must_use]
pub fn parse_info_response(response: &[u8]) -> Option<InfoReply> {
    if response.len() < INFO_SERIAL_LEN {
        return None;
    }

    let serial = u32::from_le_bytes([response[4], response[5], response[6], response[7]]);
    let firmware = response.get(8).map(|&major| {
        let minor = response.get(9).copied().unwrap_or(0);
        format!("v{major}.{minor}")
    });

    Some(InfoReply {
        serial_number: format!("ZK{serial}"),
        firmware,
    })
}

/// Device metadata from the outcome of an info exchange. Fields the reply
/// does not carry keep their defaults.
#[must_use]
pub fn metadata_from_info(reply: Result<Vec<u8>>) -> DeviceMetadata {
    let mut metadata = DeviceMetadata::default();
    match reply {
        Ok(reply) => {
            if let Some(info) = parse_info_response(&reply) {
                metadata.serial_number = info.serial_number;
                if let Some(firmware) = info.firmware {
                    metadata.firmware = firmware;
                }
            }
        }
        Err(e) => warn!(error = %e, "Could not read device info"),
    }
    metadata
}

/// Zero-pad a command into a fixed-size report.
#[must_use]
pub fn padded_report(command: &[u8], len: usize) -> Vec<u8> {
    let mut report = vec![0u8; len.max(command.len())];
    report[..command.len()].copy_from_slice(command);
    report
}
