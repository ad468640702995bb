//! Simulated transports for testing and development.
//!
//! A [`MockBus`] stands in for the physical machine: it decides which
//! transports see a device, what each capture returns and how long it takes,
//! and it records every primitive call. All transports created from one bus
//! share its bookkeeping, which makes cross-transport properties observable
//! (for example "never more than one link open at a time").
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use zkbridge_core::ConnectionType;
//! use zkbridge_hardware::mock::{MockBus, MockReply};
//! use zkbridge_hardware::traits::TransportDriver;
//!
//! let bus = MockBus::new();
//! bus.plug(ConnectionType::Serial, 1);
//! bus.queue_reply(ConnectionType::Serial, MockReply::Frame(vec![0x00, 0x55, 0x00, 0x00]));
//!
//! let mut serial = bus.transport(ConnectionType::Serial);
//! let handle = serial.discover().unwrap();
//! assert!(serial.open(&handle));
//!
//! let raw = serial.capture(Duration::from_secs(1)).unwrap();
//! assert_eq!(raw.quality, Some(0x55));
//! assert_eq!(bus.calls(ConnectionType::Serial).capture, 1);
//! ```

use crate::frame::{RawCapture, parse_capture_response};
use crate::traits::{DeviceHandle, TransportDriver};
use crate::{Result, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use zkbridge_core::{ConnectionType, DeviceMetadata};

/// Scripted outcome of one capture call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Raw reply frame, parsed exactly like a HID/serial response.
    Frame(Vec<u8>),
    /// Template without a quality score, like the vendor SDK.
    Template(Vec<u8>),
    /// The device never answered.
    Timeout,
    /// The link failed mid-capture.
    Fault(String),
}

/// Number of times each primitive was invoked on one transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub discover: usize,
    pub open: usize,
    pub close: usize,
    pub self_test: usize,
    pub capture: usize,
}

/// Capture lifecycle event, in the order the bus observed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    Started(ConnectionType),
    Finished(ConnectionType),
}

#[derive(Debug)]
struct MockDevice {
    present: Option<u32>,
    open_ok: bool,
    replies: VecDeque<MockReply>,
    capture_delay: Duration,
    metadata: Option<DeviceMetadata>,
    calls: CallCounts,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            present: None,
            open_ok: true,
            replies: VecDeque::new(),
            capture_delay: Duration::ZERO,
            metadata: None,
            calls: CallCounts::default(),
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    devices: HashMap<ConnectionType, MockDevice>,
    open_links: usize,
    max_open_links: usize,
    captures_in_flight: usize,
    max_captures_in_flight: usize,
    events: Vec<CaptureEvent>,
}

/// Shared simulated hardware. Cloning yields another handle to the same bus.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_device<T>(&self, kind: ConnectionType, f: impl FnOnce(&mut MockDevice) -> T) -> T {
        f(self.lock().devices.entry(kind).or_default())
    }

    /// Create a transport of `kind` attached to this bus.
    #[must_use]
    pub fn transport(&self, kind: ConnectionType) -> MockTransport {
        MockTransport {
            kind,
            bus: self.clone(),
            open: false,
        }
    }

    /// One transport per kind, in the given order.
    #[must_use]
    pub fn transports(&self, order: &[ConnectionType]) -> Vec<MockTransport> {
        order.iter().map(|&kind| self.transport(kind)).collect()
    }

    /// Make `kind` discover `device_count` devices.
    pub fn plug(&self, kind: ConnectionType, device_count: u32) {
        self.with_device(kind, |d| d.present = Some(device_count));
    }

    /// Make `kind` discover nothing.
    pub fn unplug(&self, kind: ConnectionType) {
        self.with_device(kind, |d| d.present = None);
    }

    /// Make `open` on `kind` fail (or succeed again).
    pub fn set_open_ok(&self, kind: ConnectionType, ok: bool) {
        self.with_device(kind, |d| d.open_ok = ok);
    }

    /// Queue the outcome of the next capture on `kind`. An empty queue
    /// behaves like [`MockReply::Timeout`].
    pub fn queue_reply(&self, kind: ConnectionType, reply: MockReply) {
        self.with_device(kind, |d| d.replies.push_back(reply));
    }

    /// Time each capture on `kind` blocks before answering.
    pub fn set_capture_delay(&self, kind: ConnectionType, delay: Duration) {
        self.with_device(kind, |d| d.capture_delay = delay);
    }

    /// Metadata reported after `open` on `kind`.
    pub fn set_metadata(&self, kind: ConnectionType, metadata: DeviceMetadata) {
        self.with_device(kind, |d| d.metadata = Some(metadata));
    }

    #[must_use]
    pub fn calls(&self, kind: ConnectionType) -> CallCounts {
        self.lock()
            .devices
            .get(&kind)
            .map(|d| d.calls)
            .unwrap_or_default()
    }

    /// Sum of discover calls across all transports.
    #[must_use]
    pub fn total_discover_calls(&self) -> usize {
        self.lock().devices.values().map(|d| d.calls.discover).sum()
    }

    /// Sum of capture calls across all transports.
    #[must_use]
    pub fn total_capture_calls(&self) -> usize {
        self.lock().devices.values().map(|d| d.calls.capture).sum()
    }

    /// Links currently open across all transports.
    #[must_use]
    pub fn open_links(&self) -> usize {
        self.lock().open_links
    }

    /// Highest number of simultaneously open links ever observed.
    #[must_use]
    pub fn max_open_links(&self) -> usize {
        self.lock().max_open_links
    }

    /// Highest number of overlapping captures ever observed.
    #[must_use]
    pub fn max_captures_in_flight(&self) -> usize {
        self.lock().max_captures_in_flight
    }

    #[must_use]
    pub fn events(&self) -> Vec<CaptureEvent> {
        self.lock().events.clone()
    }
}

/// A transport backed by a [`MockBus`].
#[derive(Debug)]
pub struct MockTransport {
    kind: ConnectionType,
    bus: MockBus,
    open: bool,
}

impl TransportDriver for MockTransport {
    fn kind(&self) -> ConnectionType {
        self.kind
    }

    fn discover(&mut self) -> Option<DeviceHandle> {
        self.bus.with_device(self.kind, |d| {
            d.calls.discover += 1;
            d.present.map(|device_count| DeviceHandle::Mock { device_count })
        })
    }

    fn open(&mut self, handle: &DeviceHandle) -> bool {
        let DeviceHandle::Mock { .. } = handle else {
            return false;
        };
        self.close();

        let ok = self.bus.with_device(self.kind, |d| {
            d.calls.open += 1;
            d.open_ok && d.present.is_some()
        });
        if !ok {
            return false;
        }

        let mut state = self.bus.lock();
        state.open_links += 1;
        state.max_open_links = state.max_open_links.max(state.open_links);
        drop(state);
        self.open = true;

        if self.self_test() {
            true
        } else {
            self.close();
            false
        }
    }

    fn close(&mut self) -> bool {
        let mut state = self.bus.lock();
        state.devices.entry(self.kind).or_default().calls.close += 1;
        if self.open {
            state.open_links -= 1;
            self.open = false;
        }
        true
    }

    fn self_test(&mut self) -> bool {
        let open = self.open;
        self.bus.with_device(self.kind, |d| {
            d.calls.self_test += 1;
            open && d.present.is_some()
        })
    }

    fn capture(&mut self, timeout: Duration) -> Result<RawCapture> {
        if !self.open {
            return Err(TransportError::disconnected(format!("mock {}", self.kind)));
        }

        let delay = {
            let mut state = self.bus.lock();
            state.captures_in_flight += 1;
            state.max_captures_in_flight = state.max_captures_in_flight.max(state.captures_in_flight);
            state.events.push(CaptureEvent::Started(self.kind));
            let device = state.devices.entry(self.kind).or_default();
            device.calls.capture += 1;
            device.capture_delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let reply = {
            let mut state = self.bus.lock();
            state.captures_in_flight -= 1;
            state.events.push(CaptureEvent::Finished(self.kind));
            state.devices.entry(self.kind).or_default().replies.pop_front()
        };

        match reply.unwrap_or(MockReply::Timeout) {
            MockReply::Frame(frame) => parse_capture_response(&frame, timeout),
            MockReply::Template(template) => Ok(RawCapture {
                template,
                quality: None,
            }),
            MockReply::Timeout => Err(TransportError::timeout(timeout.as_millis() as u64)),
            MockReply::Fault(message) => Err(TransportError::communication(message)),
        }
    }

    fn metadata(&mut self) -> DeviceMetadata {
        self.bus.with_device(self.kind, |d| {
            d.metadata.clone().unwrap_or_else(|| DeviceMetadata {
                serial_number: format!("MOCK-{}", self.kind),
                device_count: d.present.unwrap_or(0),
                ..DeviceMetadata::default()
            })
        })
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.open {
            let mut state = self.bus.lock();
            state.open_links = state.open_links.saturating_sub(1);
        }
    }
}
