//! Vendor SDK transport (libzkfp).
//!
//! The SDK owns device enumeration and framing; this driver only binds the
//! first device index and hands the library fixed-size image and template
//! buffers. The SDK does not report a serial number or capture quality, so
//! the serial is synthesized from the clock and quality is left unreported.

use crate::frame::RawCapture;
use crate::traits::{DeviceHandle, TransportDriver};
use crate::{Result, TransportError};
use std::ffi::{c_int, c_uint, c_void};
use std::ptr::NonNull;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use zkbridge_core::constants::{SDK_FIRMWARE, SDK_IMAGE_BUFFER_LEN, SDK_MODEL_NAME, SDK_TEMPLATE_BUFFER_LEN};
use zkbridge_core::{ConnectionType, DeviceMetadata};

mod ffi {
    use std::ffi::{c_int, c_uint, c_void};

    #[cfg_attr(windows, link(name = "libzkfp"))]
    #[cfg_attr(not(windows), link(name = "zkfp"))]
    unsafe extern "C" {
        pub fn ZKFPM_Init() -> c_int;
        pub fn ZKFPM_Terminate() -> c_int;
        pub fn ZKFPM_GetDeviceCount() -> c_int;
        pub fn ZKFPM_OpenDevice(index: c_int) -> *mut c_void;
        pub fn ZKFPM_CloseDevice(handle: *mut c_void) -> c_int;
        pub fn ZKFPM_AcquireFingerprint(
            handle: *mut c_void,
            image: *mut u8,
            image_size: c_uint,
            template: *mut u8,
            template_size: *mut c_uint,
        ) -> c_int;
    }
}

/// `ZKFPM_Init` result for a library that was already initialized.
const INIT_ALREADY: c_int = 1;

/// Opaque device handle returned by `ZKFPM_OpenDevice`.
struct SdkDevice(NonNull<c_void>);

// SAFETY: the handle is an opaque token. The transport is only ever used by
// one thread at a time (the manager lock guarantees it) and libzkfp does not
// bind handles to the opening thread.
unsafe impl Send for SdkDevice {}

/// Scanner driven through the vendor SDK.
#[derive(Default)]
pub struct SdkTransport {
    initialized: bool,
    device: Option<SdkDevice>,
    device_count: u32,
}

impl std::fmt::Debug for SdkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkTransport")
            .field("initialized", &self.initialized)
            .field("open", &self.device.is_some())
            .field("device_count", &self.device_count)
            .finish()
    }
}

impl SdkTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn initialize(&mut self) -> bool {
        if self.initialized {
            return true;
        }
        // SAFETY: no arguments; the library tolerates repeated init calls.
        let result = unsafe { ffi::ZKFPM_Init() };
        if result == 0 || result == INIT_ALREADY {
            self.initialized = true;
            debug!("SDK initialized");
            true
        } else {
            warn!(result, "SDK init failed");
            false
        }
    }
}

impl TransportDriver for SdkTransport {
    fn kind(&self) -> ConnectionType {
        ConnectionType::Sdk
    }

    fn discover(&mut self) -> Option<DeviceHandle> {
        info!("Scanning for scanner via vendor SDK");
        if !self.initialize() {
            return None;
        }

        // SAFETY: library is initialized.
        let count = unsafe { ffi::ZKFPM_GetDeviceCount() };
        info!(count, "SDK device count");

        (count > 0).then(|| DeviceHandle::Sdk {
            device_count: count as u32,
        })
    }

    fn open(&mut self, handle: &DeviceHandle) -> bool {
        let DeviceHandle::Sdk { device_count } = handle else {
            warn!(handle = %handle, "SDK transport cannot open foreign handle");
            return false;
        };
        self.close();
        if !self.initialize() {
            return false;
        }

        // SAFETY: library is initialized; index 0 exists because discovery
        // reported at least one device. A null return means failure.
        let raw = unsafe { ffi::ZKFPM_OpenDevice(0) };
        let Some(device) = NonNull::new(raw) else {
            warn!("SDK failed to open device 0");
            return false;
        };

        self.device = Some(SdkDevice(device));
        self.device_count = *device_count;
        if self.self_test() {
            info!("Connected via vendor SDK");
            true
        } else {
            self.close();
            false
        }
    }

    fn close(&mut self) -> bool {
        let Some(device) = self.device.take() else {
            return true;
        };
        // SAFETY: the handle came from ZKFPM_OpenDevice and is closed once.
        let result = unsafe { ffi::ZKFPM_CloseDevice(device.0.as_ptr()) };
        if result == 0 {
            info!("Closed SDK device");
            true
        } else {
            warn!(result, "SDK close reported an error");
            false
        }
    }

    /// The SDK validates the link inside `ZKFPM_OpenDevice`; a live handle
    /// is the only signal available.
    fn self_test(&mut self) -> bool {
        self.device.is_some()
    }

    fn capture(&mut self, _timeout: Duration) -> Result<RawCapture> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| TransportError::disconnected("sdk"))?;

        let mut image = vec![0u8; SDK_IMAGE_BUFFER_LEN];
        let mut template = vec![0u8; SDK_TEMPLATE_BUFFER_LEN];
        let mut template_len = SDK_TEMPLATE_BUFFER_LEN as c_uint;

        // SAFETY: both buffers outlive the call and their lengths are passed
        // alongside; the SDK writes at most `template_len` template bytes and
        // updates it with the actual length.
        let result = unsafe {
            ffi::ZKFPM_AcquireFingerprint(
                device.0.as_ptr(),
                image.as_mut_ptr(),
                image.len() as c_uint,
                template.as_mut_ptr(),
                &mut template_len,
            )
        };

        if result != 0 {
            return Err(TransportError::device_status(result));
        }

        template.truncate((template_len as usize).min(SDK_TEMPLATE_BUFFER_LEN));
        Ok(RawCapture {
            template,
            quality: None,
        })
    }

    fn metadata(&mut self) -> DeviceMetadata {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        DeviceMetadata {
            model: SDK_MODEL_NAME.to_string(),
            serial_number: format!("ZK{}", secs % 10_000),
            firmware: SDK_FIRMWARE.to_string(),
            device_count: self.device_count,
        }
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }
}

impl Drop for SdkTransport {
    fn drop(&mut self) {
        self.close();
        if self.initialized {
            // SAFETY: matched with a successful ZKFPM_Init.
            unsafe { ffi::ZKFPM_Terminate() };
        }
    }
}
