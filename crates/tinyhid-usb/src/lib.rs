//! tinyhid-usb - USB HID transport for the TinyHID bootloader
//!
//! Finds the bootloader by VID/PID and its manufacturer and product
//! strings, learns its feature report size from the HID report descriptor,
//! and implements [`tinyhid_core::FeatureTransport`] with HID class control
//! requests through `nusb`.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tinyhid_core::FlashLoader;
//! use tinyhid_usb::{DeviceFilter, HidBootloader};
//!
//! let device = HidBootloader::wait_for(&DeviceFilter::default(), Duration::from_secs(10))?;
//! let mut loader = FlashLoader::new(device)?;
//! loader.leave_bootloader()?;
//! ```

pub mod descriptor;
mod device;
mod error;

pub use device::{
    DeviceFilter, HidBootloader, HidChannel, TINYHID_MANUFACTURER, TINYHID_PRODUCT,
    TINYHID_USB_PRODUCT, TINYHID_USB_VENDOR,
};
pub use error::{Result, UsbError};
