//! Serial transport.
//!
//! Discovery prefers USB-serial ports whose vendor ID or product strings
//! identify a scanner. When nothing matches it falls back to the configured
//! port, then to the first OS port name in a bounded range that opens.
//! `open` walks every candidate port at every baud rate (configured rate
//! first) and keeps the first combination that passes the link test.
//!
//! Byte I/O goes through [`PortIo`], so the framing and poll logic runs the
//! same over a real port and over a scripted one.

use crate::frame::{RawCapture, parse_capture_response, poll_response, metadata_from_info};
use crate::traits::{DeviceHandle, TransportDriver};
use crate::{Result, TransportError};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};
use zkbridge_core::constants::{CAPTURE_COMMAND, FALLBACK_TEST_BAUD, LINK_TEST_COMMAND};
use zkbridge_core::{ConnectionType, DeviceConfig, DeviceMetadata};

/// Serial discovery and framing settings.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub vendor_ids: Vec<u16>,
    pub keywords: Vec<String>,
    pub fallback_port: Option<String>,
    pub baud_rates: Vec<u32>,
    pub probe_port_limit: u32,
    pub test_delay: Duration,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub min_response_len: usize,
}

impl From<&DeviceConfig> for SerialSettings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            vendor_ids: config.serial_vendor_ids.clone(),
            keywords: config.serial_keywords.iter().map(|k| k.to_lowercase()).collect(),
            fallback_port: config.com_port.clone(),
            baud_rates: config.baud_candidates(),
            probe_port_limit: config.probe_port_limit,
            test_delay: Duration::from_millis(config.serial_test_delay_ms),
            read_timeout: Duration::from_millis(config.serial_read_timeout_ms),
            poll_interval: config.poll_interval(),
            min_response_len: config.min_response_len,
        }
    }
}

/// Byte-level access to an open serial link.
pub trait PortIo: Read + Write + Send {
    /// Bytes waiting in the input buffer.
    fn bytes_to_read(&self) -> Result<u32>;

    fn clear(&self, buffer: ClearBuffer) -> Result<()>;
}

impl PortIo for Box<dyn SerialPort> {
    fn bytes_to_read(&self) -> Result<u32> {
        Ok(SerialPort::bytes_to_read(self.as_ref())?)
    }

    fn clear(&self, buffer: ClearBuffer) -> Result<()> {
        Ok(SerialPort::clear(self.as_ref(), buffer)?)
    }
}

/// Opens `(port name, baud rate)` as a link.
type PortOpener = Box<dyn FnMut(&str, u32) -> Result<Box<dyn PortIo>> + Send>;

fn system_opener(read_timeout: Duration) -> PortOpener {
    Box::new(move |name: &str, baud_rate: u32| -> Result<Box<dyn PortIo>> {
        let port = serialport::new(name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(read_timeout)
            .open()?;
        Ok(Box::new(port) as Box<dyn PortIo>)
    })
}

struct SerialLink {
    port: Box<dyn PortIo>,
    name: String,
    baud_rate: u32,
}

/// Scanner attached through a serial or USB-serial port.
pub struct SerialTransport {
    settings: SerialSettings,
    opener: PortOpener,
    link: Option<SerialLink>,
    device_count: u32,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.link.as_ref().map(|l| &l.name))
            .field("baud_rate", &self.link.as_ref().map(|l| l.baud_rate))
            .finish()
    }
}

impl SerialTransport {
    #[must_use]
    pub fn new(settings: SerialSettings) -> Self {
        let opener = system_opener(settings.read_timeout);
        Self::with_opener(settings, opener)
    }

    fn with_opener(settings: SerialSettings, opener: PortOpener) -> Self {
        Self {
            settings,
            opener,
            link: None,
            device_count: 0,
        }
    }

    /// Enumerated ports that look like a scanner, in enumeration order.
    fn matching_ports(&self) -> Vec<String> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate serial ports");
                return Vec::new();
            }
        };

        let mut matches = Vec::new();
        for port in ports {
            let SerialPortType::UsbPort(usb) = &port.port_type else {
                debug!(port = %port.port_name, "Skipping non-USB serial port");
                continue;
            };
            debug!(
                port = %port.port_name,
                vid = usb.vid,
                pid = usb.pid,
                "Found serial port"
            );

            if self.settings.vendor_ids.contains(&usb.vid) {
                info!(port = %port.port_name, "Found scanner by vendor ID");
                matches.push(port.port_name);
                continue;
            }

            let description = [usb.product.as_deref(), usb.manufacturer.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            if self.settings.keywords.iter().any(|k| description.contains(k.as_str())) {
                info!(port = %port.port_name, description = %description, "Found scanner by description");
                matches.push(port.port_name);
            }
        }
        matches
    }

    fn brute_force_port(&self) -> Option<String> {
        probe_port_names(self.settings.probe_port_limit)
            .into_iter()
            .find(|name| test_open(name))
            .inspect(|name| info!(port = %name, "Found available port"))
    }

    /// Write a command and return whatever is waiting after the settle delay.
    fn exchange(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let delay = self.settings.test_delay;
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| TransportError::disconnected("serial"))?;

        link.port.clear(ClearBuffer::All)?;
        link.port.write_all(command)?;
        link.port.flush()?;
        std::thread::sleep(delay);

        let waiting = link.port.bytes_to_read()? as usize;
        let mut reply = vec![0u8; waiting];
        if waiting > 0 {
            let n = link.port.read(&mut reply)?;
            reply.truncate(n);
        }
        Ok(reply)
    }
}

impl TransportDriver for SerialTransport {
    fn kind(&self) -> ConnectionType {
        ConnectionType::Serial
    }

    fn discover(&mut self) -> Option<DeviceHandle> {
        info!("Scanning for scanner on serial ports");

        let mut ports = self.matching_ports();

        if ports.is_empty()
            && let Some(configured) = self.settings.fallback_port.clone()
        {
            if test_open(&configured) {
                info!(port = %configured, "Using configured port");
                ports.push(configured);
            } else {
                warn!(port = %configured, "Configured port not available");
            }
        }

        if ports.is_empty()
            && let Some(port) = self.brute_force_port()
        {
            ports.push(port);
        }

        if ports.is_empty() {
            return None;
        }

        Some(DeviceHandle::Serial {
            ports,
            baud_rates: self.settings.baud_rates.clone(),
        })
    }

    fn open(&mut self, handle: &DeviceHandle) -> bool {
        let DeviceHandle::Serial { ports, baud_rates } = handle else {
            warn!(handle = %handle, "Serial transport cannot open foreign handle");
            return false;
        };
        self.close();

        for name in ports {
            for &baud_rate in baud_rates {
                info!(port = %name, baud_rate, "Trying serial link");

                match (self.opener)(name, baud_rate) {
                    Ok(port) => {
                        self.link = Some(SerialLink {
                            port,
                            name: name.clone(),
                            baud_rate,
                        });
                        if self.self_test() {
                            info!(port = %name, baud_rate, "Connected via serial");
                            self.device_count = handle.device_count();
                            return true;
                        }
                        self.close();
                    }
                    Err(e) => debug!(port = %name, baud_rate, error = %e, "Failed to open port"),
                }
            }
        }

        warn!("Failed to establish serial communication");
        false
    }

    fn close(&mut self) -> bool {
        if let Some(link) = self.link.take() {
            info!(port = %link.name, "Closed serial link");
        }
        true
    }

    fn self_test(&mut self) -> bool {
        match self.exchange(&LINK_TEST_COMMAND) {
            Ok(reply) if !reply.is_empty() => {
                debug!(bytes = reply.len(), "Serial link test answered");
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "Serial link test failed");
                false
            }
        }
    }

    fn capture(&mut self, timeout: Duration) -> Result<RawCapture> {
        let min_len = self.settings.min_response_len;
        let interval = self.settings.poll_interval;
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| TransportError::disconnected("serial"))?;

        link.port.clear(ClearBuffer::Input)?;
        link.port.write_all(&CAPTURE_COMMAND)?;
        link.port.flush()?;

        let port = &mut link.port;
        let response = poll_response(
            |buf| {
                let waiting = port.bytes_to_read()? as usize;
                if waiting > 0 {
                    let mut chunk = vec![0u8; waiting];
                    let n = port.read(&mut chunk)?;
                    buf.extend_from_slice(&chunk[..n]);
                }
                Ok(())
            },
            min_len,
            timeout,
            interval,
        )?;

        debug!(bytes = response.len(), "Serial capture response");
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

fn test_open(name: &str) -> bool {
    serialport::new(name, FALLBACK_TEST_BAUD)
        .timeout(Duration::from_secs(1))
        .open()
        .is_ok()
}

/// OS port names tried when enumeration finds nothing.
#[must_use]
pub fn probe_port_names(limit: u32) -> Vec<String> {
    if cfg!(windows) {
        (1..=limit).map(|i| format!("COM{i}")).collect()
    } else {
        (0..limit)
            .flat_map(|i| [format!("/dev/ttyUSB{i}"), format!("/dev/ttyACM{i}")])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Bytes a scripted port delivers after each write, one chunk per
    /// `bytes_to_read` call.
    #[derive(Default)]
    struct Script {
        replies: VecDeque<Vec<Vec<u8>>>,
        incoming: VecDeque<Vec<u8>>,
        available: VecDeque<u8>,
        written: Vec<Vec<u8>>,
        read_error: bool,
    }

    struct ScriptedPort(Arc<Mutex<Script>>);

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut script = self.0.lock().unwrap();
            if script.read_error {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"));
            }
            let n = buf.len().min(script.available.len());
            for (slot, byte) in buf.iter_mut().zip(script.available.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut script = self.0.lock().unwrap();
            script.written.push(buf.to_vec());
            let reply = script.replies.pop_front().unwrap_or_default();
            script.incoming = reply.into();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl PortIo for ScriptedPort {
        fn bytes_to_read(&self) -> Result<u32> {
            let mut script = self.0.lock().unwrap();
            if script.available.is_empty()
                && let Some(chunk) = script.incoming.pop_front()
            {
                script.available.extend(chunk);
            }
            Ok(script.available.len() as u32)
        }

        fn clear(&self, buffer: ClearBuffer) -> Result<()> {
            let mut script = self.0.lock().unwrap();
            if matches!(buffer, ClearBuffer::Input | ClearBuffer::All) {
                script.available.clear();
            }
            Ok(())
        }
    }

    /// Ports that exist, keyed by `(name, baud)`, plus every open attempt.
    #[derive(Clone, Default)]
    struct ScriptedLine {
        ports: Arc<Mutex<HashMap<(String, u32), Arc<Mutex<Script>>>>>,
        attempts: Arc<Mutex<Vec<(String, u32)>>>,
    }

    impl ScriptedLine {
        fn attach(&self, name: &str, baud_rate: u32, replies: Vec<Vec<Vec<u8>>>) -> Arc<Mutex<Script>> {
            let script = Arc::new(Mutex::new(Script {
                replies: replies.into(),
                ..Script::default()
            }));
            self.ports
                .lock()
                .unwrap()
                .insert((name.to_string(), baud_rate), Arc::clone(&script));
            script
        }

        fn transport(&self) -> SerialTransport {
            let line = self.clone();
            let settings = SerialSettings {
                test_delay: Duration::from_millis(1),
                poll_interval: Duration::from_millis(1),
                ..SerialSettings::from(&DeviceConfig::default())
            };
            SerialTransport::with_opener(
                settings,
                Box::new(move |name: &str, baud_rate: u32| {
                    line.attempts.lock().unwrap().push((name.to_string(), baud_rate));
                    match line.ports.lock().unwrap().get(&(name.to_string(), baud_rate)) {
                        Some(script) => Ok(Box::new(ScriptedPort(Arc::clone(script))) as Box<dyn PortIo>),
                        None => Err(TransportError::communication("no such port")),
                    }
                }),
            )
        }
    }

    const INFO_REPLY: [u8; 10] = [0x00, 0, 0, 0, 0x39, 0x30, 0, 0, 2, 1];

    fn serial_handle(ports: &[&str], baud_rates: &[u32]) -> DeviceHandle {
        DeviceHandle::Serial {
            ports: ports.iter().map(ToString::to_string).collect(),
            baud_rates: baud_rates.to_vec(),
        }
    }

    #[test]
    fn test_open_walks_ports_then_bauds() {
        let line = ScriptedLine::default();
        // Opens at 9600 but stays silent, answers at 115200.
        line.attach("/dev/ttyUSB1", 9600, vec![]);
        line.attach("/dev/ttyUSB1", 115200, vec![vec![INFO_REPLY.to_vec()]]);
        let mut transport = line.transport();

        let handle = serial_handle(&["/dev/ttyUSB0", "/dev/ttyUSB1"], &[9600, 115200]);
        assert!(transport.open(&handle));
        assert!(transport.is_open());
        assert_eq!(
            *line.attempts.lock().unwrap(),
            vec![
                ("/dev/ttyUSB0".to_string(), 9600),
                ("/dev/ttyUSB0".to_string(), 115200),
                ("/dev/ttyUSB1".to_string(), 9600),
                ("/dev/ttyUSB1".to_string(), 115200),
            ]
        );
        assert!(format!("{transport:?}").contains("115200"));
    }

    #[test]
    fn test_open_fails_when_nothing_answers() {
        let line = ScriptedLine::default();
        line.attach("COM3", 9600, vec![]);
        let mut transport = line.transport();

        assert!(!transport.open(&serial_handle(&["COM3", "COM4"], &[9600])));
        assert!(!transport.is_open());
        assert_eq!(line.attempts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_capture_accumulates_chunks() {
        let line = ScriptedLine::default();
        let script = line.attach(
            "COM3",
            9600,
            vec![
                vec![vec![0x00]],
                vec![INFO_REPLY.to_vec()],
                vec![vec![0x00, 0x78], vec![0x00, 0x00], vec![1, 2], vec![3, 4]],
            ],
        );
        let mut transport = line.transport();
        assert!(transport.open(&serial_handle(&["COM3", "COM9"], &[9600])));

        let metadata = transport.metadata();
        assert_eq!(metadata.serial_number, "ZK12345");
        assert_eq!(metadata.firmware, "v2.1");
        assert_eq!(metadata.device_count, 2);

        let raw = transport.capture(Duration::from_secs(2)).unwrap();
        assert_eq!(raw.template, vec![1, 2, 3, 4]);
        assert_eq!(raw.quality, Some(0x78));

        let written = script.lock().unwrap().written.clone();
        assert_eq!(written.last().map(Vec::as_slice), Some(&CAPTURE_COMMAND[..]));
        assert_eq!(written[0], LINK_TEST_COMMAND.to_vec());
    }

    #[test]
    fn test_capture_short_reply_is_timeout() {
        let line = ScriptedLine::default();
        line.attach("COM3", 9600, vec![vec![vec![0x00]], vec![vec![0x00, 0x10]]]);
        let mut transport = line.transport();
        assert!(transport.open(&serial_handle(&["COM3"], &[9600])));

        let err = transport.capture(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { duration_ms: 30 }));
        assert!(transport.is_open());
    }

    #[test]
    fn test_capture_status_byte_is_reported() {
        let line = ScriptedLine::default();
        line.attach(
            "COM3",
            9600,
            vec![vec![vec![0x00]], vec![vec![0x03, 0, 0, 0, 0, 0, 0, 0]]],
        );
        let mut transport = line.transport();
        assert!(transport.open(&serial_handle(&["COM3"], &[9600])));

        let err = transport.capture(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::DeviceStatus { code: 3 }));
    }

    #[test]
    fn test_capture_read_error_is_fatal() {
        let line = ScriptedLine::default();
        let script = line.attach("COM3", 9600, vec![vec![vec![0x00]], vec![vec![0x00, 0x10]]]);
        let mut transport = line.transport();
        assert!(transport.open(&serial_handle(&["COM3"], &[9600])));

        script.lock().unwrap().read_error = true;
        let err = transport.capture(Duration::from_secs(1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_settings_from_config() {
        let config = DeviceConfig {
            baud_rate: Some(115200),
            com_port: Some("COM7".into()),
            ..DeviceConfig::default()
        };
        let settings = SerialSettings::from(&config);
        assert_eq!(settings.baud_rates[0], 115200);
        assert_eq!(settings.baud_rates.len(), 5);
        assert_eq!(settings.fallback_port.as_deref(), Some("COM7"));
        assert_eq!(settings.test_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_probe_port_names_are_bounded() {
        let names = probe_port_names(20);
        if cfg!(windows) {
            assert_eq!(names.first().map(String::as_str), Some("COM1"));
            assert_eq!(names.last().map(String::as_str), Some("COM20"));
        } else {
            assert_eq!(names.len(), 40);
            assert_eq!(names[0], "/dev/ttyUSB0");
        }
    }

    #[test]
    fn test_closed_transport_rejects_capture() {
        let mut transport = SerialTransport::new(SerialSettings::from(&DeviceConfig::default()));
        assert!(!transport.is_open());
        assert!(transport.close());
        let err = transport.capture(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rejects_foreign_handle() {
        let mut transport = SerialTransport::new(SerialSettings::from(&DeviceConfig::default()));
        assert!(!transport.open(&DeviceHandle::Sdk { device_count: 1 }));
        assert!(!transport.is_open());
    }
}
