//! Device acquisition and dispatch
//!
//! Commands work on a [`Device`], which is either the USB bootloader or the
//! in-memory emulator, chosen at run time by `--dummy`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::signal::SIGINT;

use tinyhid_core::{
    DeviceGeometry, FeatureChannel, FeatureTransport, FlashLoader, ReportLayout,
};

use crate::cli::{DeviceArgs, LayoutChoice};

/// A bootloader reachable by any compiled-in transport
pub enum Device {
    /// Real hardware over USB
    #[cfg(feature = "usb")]
    Usb(tinyhid_usb::HidBootloader),
    /// In-memory emulator
    #[cfg(feature = "dummy")]
    Dummy(tinyhid_dummy::DummyBootloader),
}

impl Device {
    /// Short description for messages
    pub fn describe(&self) -> String {
        match self {
            #[cfg(feature = "usb")]
            Device::Usb(dev) => format!(
                "{:04X}:{:04X} {} / {} (interface {})",
                dev.vendor_id(),
                dev.product_id(),
                dev.manufacturer().unwrap_or("?"),
                dev.product().unwrap_or("?"),
                dev.interface_number()
            ),
            #[cfg(feature = "dummy")]
            Device::Dummy(_) => "emulated bootloader".to_string(),
        }
    }
}

impl Device {
    /// Find the device again after it re-enumerated
    ///
    /// The emulator never disconnects, so it is handed back as is.
    pub fn reacquire(
        self,
        args: &DeviceArgs,
        timeout: Duration,
    ) -> Result<Device, Box<dyn std::error::Error>> {
        match self {
            #[cfg(feature = "usb")]
            Device::Usb(_) => acquire_usb(args, timeout),
            #[cfg(feature = "dummy")]
            Device::Dummy(dev) => Ok(Device::Dummy(dev)),
        }
    }

    /// Whether this is the in-memory emulator
    pub fn is_emulated(&self) -> bool {
        match self {
            #[cfg(feature = "usb")]
            Device::Usb(_) => false,
            #[cfg(feature = "dummy")]
            Device::Dummy(_) => true,
        }
    }
}

impl FeatureTransport for Device {
    type Channel = Box<dyn FeatureChannel>;

    fn open(&mut self) -> tinyhid_core::Result<Self::Channel> {
        match self {
            #[cfg(feature = "usb")]
            Device::Usb(dev) => Ok(Box::new(dev.open()?)),
            #[cfg(feature = "dummy")]
            Device::Dummy(dev) => Ok(Box::new(dev.open()?)),
        }
    }

    fn report_size(&self) -> usize {
        match self {
            #[cfg(feature = "usb")]
            Device::Usb(dev) => dev.report_size(),
            #[cfg(feature = "dummy")]
            Device::Dummy(dev) => dev.report_size(),
        }
    }
}

/// Flash geometry from the command line
pub fn geometry(args: &DeviceArgs) -> tinyhid_core::Result<DeviceGeometry> {
    DeviceGeometry::new(args.bootloader_start as usize, args.flash_size as usize)
}

/// Find the bootloader, polling for up to `timeout`
pub fn acquire(args: &DeviceArgs, timeout: Duration) -> Result<Device, Box<dyn std::error::Error>> {
    if args.dummy {
        return acquire_dummy(args);
    }
    acquire_usb(args, timeout)
}

#[cfg(feature = "dummy")]
fn acquire_dummy(args: &DeviceArgs) -> Result<Device, Box<dyn std::error::Error>> {
    let layout = match args.layout {
        LayoutChoice::Legacy => ReportLayout::LEGACY,
        LayoutChoice::Auto | LayoutChoice::Current => ReportLayout::CURRENT,
    };
    let config = tinyhid_dummy::DummyConfig {
        layout,
        geometry: geometry(args)?,
        ..Default::default()
    };
    log::info!("Using emulated bootloader ({} layout)", layout.name);
    Ok(Device::Dummy(tinyhid_dummy::DummyBootloader::new(config)))
}

#[cfg(not(feature = "dummy"))]
fn acquire_dummy(_args: &DeviceArgs) -> Result<Device, Box<dyn std::error::Error>> {
    Err("emulator support not compiled in".into())
}

#[cfg(feature = "usb")]
fn acquire_usb(args: &DeviceArgs, timeout: Duration) -> Result<Device, Box<dyn std::error::Error>> {
    let filter = tinyhid_usb::DeviceFilter {
        vendor_id: args.vid,
        product_id: args.pid,
        manufacturer: Some(args.manufacturer.clone()),
        product: Some(args.product.clone()),
        report_size: None,
    };
    let device = tinyhid_usb::HidBootloader::wait_for(&filter, timeout)
        .map_err(tinyhid_core::Error::from)?;
    Ok(Device::Usb(device))
}

#[cfg(not(feature = "usb"))]
fn acquire_usb(_args: &DeviceArgs, _timeout: Duration) -> Result<Device, Box<dyn std::error::Error>> {
    Err("USB support not compiled in (use --dummy)".into())
}

/// Wrap a device in a loader with the requested layout
///
/// The first Ctrl-C stops the loader between reports; a second one exits.
pub fn loader(
    device: Device,
    args: &DeviceArgs,
) -> Result<FlashLoader<Device>, Box<dyn std::error::Error>> {
    let loader = match args.layout {
        LayoutChoice::Auto => FlashLoader::new(device)?,
        LayoutChoice::Legacy => FlashLoader::with_layout(device, ReportLayout::LEGACY)?,
        LayoutChoice::Current => FlashLoader::with_layout(device, ReportLayout::CURRENT)?,
    };
    Ok(loader.with_cancel_flag(interrupt_flag()?))
}

fn interrupt_flag() -> std::io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register_conditional_shutdown(SIGINT, 130, flag.clone())?;
    signal_hook::flag::register(SIGINT, flag.clone())?;
    Ok(flag)
}

/// Acquire the device and build a loader in one step
pub fn open_loader(args: &DeviceArgs) -> Result<FlashLoader<Device>, Box<dyn std::error::Error>> {
    let device = acquire(args, Duration::from_secs(args.timeout))?;
    log::debug!("Opened {}", device.describe());
    loader(device, args)
}
