//! TinyHID bootloader device discovery and feature report transfers
//!
//! The bootloader is a plain HID device with one vendor-defined feature
//! report. Reports are exchanged with HID class `SET_REPORT` and
//! `GET_REPORT` control requests on its HID interface.

use std::thread;
use std::time::{Duration, Instant};

use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient};
use nusb::{DeviceInfo, Interface, MaybeFuture};
use tinyhid_core::error::Result as CoreResult;
use tinyhid_core::{FeatureChannel, FeatureTransport};

use crate::descriptor::feature_report_size;
use crate::error::{Result, UsbError};

/// Default bootloader vendor ID (shared V-USB VID)
pub const TINYHID_USB_VENDOR: u16 = 0x16C0;
/// Default bootloader product ID (shared V-USB HID PID)
pub const TINYHID_USB_PRODUCT: u16 = 0x05DF;
/// Manufacturer string the bootloader reports
pub const TINYHID_MANUFACTURER: &str = "deli.su";
/// Product string the bootloader reports
pub const TINYHID_PRODUCT: &str = "TinyHID Loader";

const USB_CLASS_HID: u8 = 0x03;

const HID_GET_REPORT: u8 = 0x01;
const HID_SET_REPORT: u8 = 0x09;
const HID_REPORT_TYPE_FEATURE: u16 = 0x03;

const USB_REQ_GET_DESCRIPTOR: u8 = 0x06;
const HID_DESCRIPTOR_REPORT: u16 = 0x22;
const REPORT_DESCRIPTOR_MAX: u16 = 256;

const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which devices count as a TinyHID bootloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Required manufacturer string, if any
    pub manufacturer: Option<String>,
    /// Required product string, if any
    pub product: Option<String>,
    /// Required feature report size including the report ID byte, if any
    pub report_size: Option<usize>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            vendor_id: TINYHID_USB_VENDOR,
            product_id: TINYHID_USB_PRODUCT,
            manufacturer: Some(TINYHID_MANUFACTURER.to_string()),
            product: Some(TINYHID_PRODUCT.to_string()),
            report_size: None,
        }
    }
}

impl DeviceFilter {
    /// Whether a device matches the IDs and strings
    pub fn matches(&self, info: &DeviceInfo) -> bool {
        if info.vendor_id() != self.vendor_id || info.product_id() != self.product_id {
            return false;
        }
        string_matches(self.manufacturer.as_deref(), info.manufacturer_string())
            && string_matches(self.product.as_deref(), info.product_string())
    }
}

fn poll_until<T>(
    timeout: Duration,
    interval: Duration,
    mut attempt: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    let start = Instant::now();
    let mut last_error = None;
    loop {
        match attempt() {
            Ok(Some(found)) => return Ok(found),
            Ok(None) => last_error = None,
            Err(e) if e.is_transient() => {
                log::debug!("Device not ready: {}", e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
        if start.elapsed() >= timeout {
            return Err(last_error.unwrap_or(UsbError::DeviceNotFound));
        }
        thread::sleep(interval);
    }
}

fn string_matches(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => actual == Some(wanted),
    }
}

/// A discovered TinyHID bootloader
///
/// Discovery reads the HID report descriptor to learn the feature report
/// size. The device itself is only held while a channel from
/// [`open`](FeatureTransport::open) is alive.
pub struct HidBootloader {
    info: DeviceInfo,
    interface_number: u8,
    report_size: usize,
}

impl HidBootloader {
    /// Find the first connected bootloader matching `filter`
    ///
    /// Every matching device is tried in turn. If none can be opened, the
    /// error from the last one is returned.
    pub fn find(filter: &DeviceFilter) -> Result<Option<Self>> {
        let devices: Vec<_> = nusb::list_devices()
            .wait()
            .map_err(|e| UsbError::OpenFailed(e.to_string()))?
            .filter(|d| filter.matches(d))
            .collect();

        let mut last_error = None;
        for info in devices {
            let device = match Self::from_info(info) {
                Ok(device) => device,
                Err(e) => {
                    log::warn!("Skipping device: {}", e);
                    last_error = Some(e);
                    continue;
                }
            };
            match filter.report_size {
                Some(size) if size != device.report_size => log::warn!(
                    "Ignoring device with {}-byte feature report (want {})",
                    device.report_size,
                    size
                ),
                _ => return Ok(Some(device)),
            }
        }
        last_error.map_or(Ok(None), Err)
    }

    /// Poll for a bootloader once per second until `timeout` elapses
    ///
    /// A zero timeout checks exactly once. Transient failures on a device
    /// that is still enumerating keep the poll going; the last one is
    /// returned if the timeout expires.
    pub fn wait_for(filter: &DeviceFilter, timeout: Duration) -> Result<Self> {
        poll_until(timeout, POLL_INTERVAL, || {
            log::debug!("Looking for device {:04X}:{:04X}", filter.vendor_id, filter.product_id);
            Self::find(filter)
        })
    }

    fn from_info(info: DeviceInfo) -> Result<Self> {
        log::info!(
            "Found bootloader {:04X}:{:04X} at bus {} address {}",
            info.vendor_id(),
            info.product_id(),
            info.bus_id(),
            info.device_address()
        );

        let interface_number = info
            .interfaces()
            .find(|i| i.class() == USB_CLASS_HID)
            .map(|i| i.interface_number())
            .ok_or(UsbError::NoHidInterface)?;
        log::debug!("Using HID interface {}", interface_number);

        let interface = claim(&info, interface_number)?;
        let descriptor = interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Standard,
                    recipient: Recipient::Interface,
                    request: USB_REQ_GET_DESCRIPTOR,
                    value: HID_DESCRIPTOR_REPORT << 8,
                    index: interface_number as u16,
                    length: REPORT_DESCRIPTOR_MAX,
                },
                TRANSFER_TIMEOUT,
            )
            .wait()
            .map_err(|e| UsbError::TransferFailed(e.to_string()))?;
        log::trace!("Report descriptor: {:02X?}", descriptor);

        let report_size = feature_report_size(&descriptor)?;
        log::debug!("Feature report size: {} bytes", report_size);

        Ok(Self {
            info,
            interface_number,
            report_size,
        })
    }

    /// USB vendor ID
    pub fn vendor_id(&self) -> u16 {
        self.info.vendor_id()
    }

    /// USB product ID
    pub fn product_id(&self) -> u16 {
        self.info.product_id()
    }

    /// Manufacturer string, if the platform reports it
    pub fn manufacturer(&self) -> Option<&str> {
        self.info.manufacturer_string()
    }

    /// Product string, if the platform reports it
    pub fn product(&self) -> Option<&str> {
        self.info.product_string()
    }

    /// Number of the HID interface in use
    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }
}

fn claim(info: &DeviceInfo, interface_number: u8) -> Result<Interface> {
    let device = info
        .open()
        .wait()
        .map_err(|e| UsbError::OpenFailed(e.to_string()))?;
    device
        .detach_and_claim_interface(interface_number)
        .wait()
        .map_err(|e| UsbError::ClaimFailed(e.to_string()))
}

/// Claimed HID interface; released on drop
pub struct HidChannel {
    interface: Interface,
    interface_number: u8,
}

impl HidChannel {
    fn set_report(&mut self, report: &[u8]) -> Result<()> {
        let id = report[0];
        // Without report IDs the ID byte is not sent
        let data = if id == 0 { &report[1..] } else { report };
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_SET_REPORT,
                    value: (HID_REPORT_TYPE_FEATURE << 8) | id as u16,
                    index: self.interface_number as u16,
                    data,
                },
                TRANSFER_TIMEOUT,
            )
            .wait()
            .map_err(|e| UsbError::TransferFailed(e.to_string()))
    }

    fn get_report(&mut self, report: &mut [u8]) -> Result<()> {
        let expected = report.len() - 1;
        let data = self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_GET_REPORT,
                    value: HID_REPORT_TYPE_FEATURE << 8,
                    index: self.interface_number as u16,
                    length: expected as u16,
                },
                TRANSFER_TIMEOUT,
            )
            .wait()
            .map_err(|e| UsbError::TransferFailed(e.to_string()))?;

        if data.len() < expected {
            return Err(UsbError::ShortReport {
                got: data.len(),
                expected,
            });
        }
        report[0] = 0;
        report[1..].copy_from_slice(&data[..expected]);
        Ok(())
    }
}

impl FeatureChannel for HidChannel {
    fn set_feature_report(&mut self, report: &[u8]) -> CoreResult<()> {
        Ok(self.set_report(report)?)
    }

    fn get_feature_report(&mut self, report: &mut [u8]) -> CoreResult<()> {
        Ok(self.get_report(report)?)
    }
}

impl FeatureTransport for HidBootloader {
    type Channel = HidChannel;

    fn open(&mut self) -> CoreResult<HidChannel> {
        let interface = claim(&self.info, self.interface_number)?;
        Ok(HidChannel {
            interface,
            interface_number: self.interface_number,
        })
    }

    fn report_size(&self) -> usize {
        self.report_size
    }
}
