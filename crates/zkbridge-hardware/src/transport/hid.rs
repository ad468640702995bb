//! USB HID transport.
//!
//! Commands go out as 64-byte zero-padded reports and replies come back
//! in 64-byte reports. Reads run in non-blocking mode so the capture poll
//! loop controls the timing. Report I/O goes through [`ReportIo`].

use crate::frame::{RawCapture, padded_report, parse_capture_response, poll_response, metadata_from_info};
use crate::traits::{DeviceHandle, TransportDriver};
use crate::{Result, TransportError};
use hidapi::{HidApi, HidDevice};
use std::time::Duration;
use tracing::{debug, info, warn};
use zkbridge_core::constants::{CAPTURE_COMMAND, HID_REPORT_LEN, LINK_TEST_COMMAND};
use zkbridge_core::{ConnectionType, DeviceConfig, DeviceMetadata, HidDeviceId};

/// HID discovery and framing settings.
#[derive(Debug, Clone)]
pub struct HidSettings {
    /// Allow-listed vendor/product pairs in probe order.
    pub devices: Vec<HidDeviceId>,
    pub test_delay: Duration,
    pub poll_interval: Duration,
    pub min_response_len: usize,
}

impl From<&DeviceConfig> for HidSettings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            devices: config.hid_devices.clone(),
            test_delay: Duration::from_millis(config.hid_test_delay_ms),
            poll_interval: config.poll_interval(),
            min_response_len: config.min_response_len,
        }
    }
}

/// Report-level access to an open HID device.
pub trait ReportIo: Send {
    fn write(&self, report: &[u8]) -> Result<usize>;

    /// Read one report without blocking. Returns 0 when nothing is waiting.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;
}

impl ReportIo for HidDevice {
    fn write(&self, report: &[u8]) -> Result<usize> {
        Ok(HidDevice::write(self, report)?)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(HidDevice::read(self, buf)?)
    }
}

/// Opens one allow-listed device in non-blocking mode.
type DeviceOpener = Box<dyn FnMut(HidDeviceId) -> Result<Box<dyn ReportIo>> + Send>;

fn system_opener() -> DeviceOpener {
    Box::new(|id: HidDeviceId| -> Result<Box<dyn ReportIo>> {
        let api = HidApi::new()?;
        let device = api.open(id.vendor_id, id.product_id)?;
        device.set_blocking_mode(false)?;
        Ok(Box::new(device) as Box<dyn ReportIo>)
    })
}

struct HidLink {
    device: Box<dyn ReportIo>,
    id: HidDeviceId,
}

/// Scanner attached as a USB HID device.
pub struct HidTransport {
    settings: HidSettings,
    opener: DeviceOpener,
    link: Option<HidLink>,
    device_count: u32,
}

impl std::fmt::Debug for HidTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidTransport")
            .field("device", &self.link.as_ref().map(|l| l.id))
            .finish()
    }
}

impl HidTransport {
    #[must_use]
    pub fn new(settings: HidSettings) -> Self {
        Self::with_opener(settings, system_opener())
    }

    fn with_opener(settings: HidSettings, opener: DeviceOpener) -> Self {
        Self {
            settings,
            opener,
            link: None,
            device_count: 0,
        }
    }

    fn write_report(&mut self, command: &[u8]) -> Result<()> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| TransportError::disconnected("hid"))?;
        link.device.write(&padded_report(command, HID_REPORT_LEN))?;
        Ok(())
    }

    fn read_report(&mut self) -> Result<Vec<u8>> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| TransportError::disconnected("hid"))?;
        let mut report = [0u8; HID_REPORT_LEN];
        let n = link.device.read(&mut report)?;
        Ok(report[..n].to_vec())
    }

    /// Send a command and read one report after the settle delay.
    fn exchange(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        self.write_report(command)?;
        std::thread::sleep(self.settings.test_delay);
        self.read_report()
    }
}

impl TransportDriver for HidTransport {
    fn kind(&self) -> ConnectionType {
        ConnectionType::Hid
    }

    fn discover(&mut self) -> Option<DeviceHandle> {
        info!("Scanning for scanner via USB HID");

        let api = match HidApi::new() {
            Ok(api) => api,
            Err(e) => {
                warn!(error = %e, "HID backend unavailable");
                return None;
            }
        };

        let present: Vec<HidDeviceId> = self
            .settings
            .devices
            .iter()
            .copied()
            .filter(|id| {
                api.device_list()
                    .any(|d| d.vendor_id() == id.vendor_id && d.product_id() == id.product_id)
            })
            .collect();

        if present.is_empty() {
            info!("No allow-listed HID device found");
            return None;
        }

        Some(DeviceHandle::Hid { candidates: present })
    }

    fn open(&mut self, handle: &DeviceHandle) -> bool {
        let DeviceHandle::Hid { candidates } = handle else {
            warn!(handle = %handle, "HID transport cannot open foreign handle");
            return false;
        };
        self.close();

        for &id in candidates {
            let device = match (self.opener)(id) {
                Ok(device) => device,
                Err(e) => {
                    debug!(device = %id, error = %e, "HID device refused connection");
                    continue;
                }
            };

            self.link = Some(HidLink { device, id });
            if self.self_test() {
                info!(device = %id, "Connected via USB HID");
                self.device_count = handle.device_count();
                return true;
            }
            self.close();
        }

        false
    }

    fn close(&mut self) -> bool {
        if let Some(link) = self.link.take() {
            info!(device = %link.id, "Closed HID device");
        }
        true
    }

    fn self_test(&mut self) -> bool {
        match self.exchange(&LINK_TEST_COMMAND) {
            Ok(reply) if !reply.is_empty() => {
                debug!(bytes = reply.len(), "HID link test answered");
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "HID link test failed");
                false
            }
        }
    }

    fn capture(&mut self, timeout: Duration) -> Result<RawCapture> {
        self.write_report(&CAPTURE_COMMAND)?;

        let min_len = self.settings.min_response_len;
        let interval = self.settings.poll_interval;
        let response = poll_response(
            |buf| {
                let chunk = self.read_report()?;
                buf.extend_from_slice(&chunk);
                Ok(())
            },
            min_len,
            timeout,
            interval,
        )?;

        debug!(bytes = response.len(), "HID capture response");
        parse_capture_response(&response, timeout)
    }

    fn metadata(&mut self) -> DeviceMetadata {
        let mut metadata = metadata_from_info(self.exchange(&LINK_TEST_COMMAND));
        metadata.device_count = self.device_count;
        metadata
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_settings_from_config() {
        let settings = HidSettings::from(&DeviceConfig::default());
        assert_eq!(settings.devices.len(), 5);
        assert_eq!(settings.devices[0].vendor_id, 0x1b55);
        assert_eq!(settings.test_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_closed_transport_rejects_capture() {
        let mut transport = HidTransport::new(HidSettings::from(&DeviceConfig::default()));
        let err = transport.capture(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected { .. }));
    }

    /// Device that answers each written report with a list of input
    /// reports, one per read.
    #[derive(Default)]
    struct Reports {
        replies: VecDeque<Vec<Vec<u8>>>,
        pending: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
    }

    struct ScriptedDevice(Arc<Mutex<Reports>>);

    impl ReportIo for ScriptedDevice {
        fn write(&self, report: &[u8]) -> Result<usize> {
            let mut reports = self.0.lock().unwrap();
            reports.written.push(report.to_vec());
            let reply = reports.replies.pop_front().unwrap_or_default();
            reports.pending = reply.into();
            Ok(report.len())
        }

        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let mut reports = self.0.lock().unwrap();
            let Some(report) = reports.pending.pop_front() else {
                return Ok(0);
            };
            let n = report.len().min(buf.len());
            buf[..n].copy_from_slice(&report[..n]);
            Ok(n)
        }
    }

    const PRIMARY: HidDeviceId = HidDeviceId {
        vendor_id: 0x1b55,
        product_id: 0x0124,
    };
    const SECONDARY: HidDeviceId = HidDeviceId {
        vendor_id: 0x2808,
        product_id: 0x0001,
    };

    fn scripted(devices: Vec<(HidDeviceId, Arc<Mutex<Reports>>)>) -> (HidTransport, Arc<Mutex<Vec<HidDeviceId>>>) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&attempts);
        let settings = HidSettings {
            test_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            ..HidSettings::from(&DeviceConfig::default())
        };
        let transport = HidTransport::with_opener(
            settings,
            Box::new(move |id: HidDeviceId| {
                seen.lock().unwrap().push(id);
                devices
                    .iter()
                    .find(|(known, _)| *known == id)
                    .map(|(_, reports)| Box::new(ScriptedDevice(Arc::clone(reports))) as Box<dyn ReportIo>)
                    .ok_or_else(|| TransportError::communication("device refused"))
            }),
        );
        (transport, attempts)
    }

    fn reports(replies: Vec<Vec<Vec<u8>>>) -> Arc<Mutex<Reports>> {
        Arc::new(Mutex::new(Reports {
            replies: replies.into(),
            ..Reports::default()
        }))
    }

    #[test]
    fn test_open_skips_silent_candidate() {
        let silent = reports(vec![]);
        let live = reports(vec![vec![vec![0x00]]]);
        let (mut transport, attempts) = scripted(vec![(PRIMARY, silent), (SECONDARY, Arc::clone(&live))]);

        let handle = DeviceHandle::Hid {
            candidates: vec![PRIMARY, SECONDARY],
        };
        assert!(transport.open(&handle));
        assert_eq!(*attempts.lock().unwrap(), vec![PRIMARY, SECONDARY]);
        assert_eq!(transport.link.as_ref().map(|l| l.id), Some(SECONDARY));

        let written = live.lock().unwrap().written.clone();
        assert_eq!(written[0].len(), HID_REPORT_LEN);
        assert_eq!(&written[0][..4], &LINK_TEST_COMMAND);
    }

    #[test]
    fn test_capture_reads_reports_until_threshold() {
        let device = reports(vec![
            vec![vec![0x00]],
            vec![vec![0x00, 0, 0, 0, 0x07, 0, 0, 0, 1, 0]],
            vec![vec![0x00, 0x5a, 0x00, 0x00], vec![9, 8, 7, 6]],
        ]);
        let (mut transport, _) = scripted(vec![(PRIMARY, Arc::clone(&device))]);
        let handle = DeviceHandle::Hid {
            candidates: vec![PRIMARY],
        };
        assert!(transport.open(&handle));

        let metadata = transport.metadata();
        assert_eq!(metadata.serial_number, "ZK7");
        assert_eq!(metadata.device_count, 1);

        let raw = transport.capture(Duration::from_secs(2)).unwrap();
        assert_eq!(raw.quality, Some(0x5a));
        assert_eq!(raw.template, vec![9, 8, 7, 6]);

        let written = device.lock().unwrap().written.clone();
        assert_eq!(&written[2][..4], &CAPTURE_COMMAND);
    }

    #[test]
    fn test_capture_without_reply_times_out() {
        let device = reports(vec![vec![vec![0x00]]]);
        let (mut transport, _) = scripted(vec![(PRIMARY, device)]);
        assert!(transport.open(&DeviceHandle::Hid {
            candidates: vec![PRIMARY],
        }));

        let err = transport.capture(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { duration_ms: 20 }));
        assert!(transport.is_open());
    }
}
