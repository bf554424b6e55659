//! tinyhid-core - Host side of the TinyHID USB bootloader protocol
//!
//! This crate contains everything needed to flash a TinyHID device that
//! does not touch USB: Intel HEX images, flash image construction, feature
//! report framing with its checksums, and the page-oriented write and read
//! protocol with its retry and fallback strategy.
//!
//! The USB side is abstracted by [`transport::FeatureTransport`]; see the
//! `tinyhid-usb` crate for real hardware and `tinyhid-dummy` for an
//! emulated device.
//!
//! # Example
//!
//! ```ignore
//! use tinyhid_core::{build_application_image, DeviceGeometry, FlashLoader, HexImage, NoProgress};
//!
//! fn flash<T: tinyhid_core::FeatureTransport>(device: T) -> tinyhid_core::Result<()> {
//!     let geometry = DeviceGeometry::default();
//!     let image = HexImage::load(std::path::Path::new("firmware.hex"))?;
//!     let program = build_application_image(&image, &geometry)?;
//!     let mut loader = FlashLoader::new(device)?;
//!     loader.write_flash(&program, geometry.application_limit(), &mut NoProgress)?;
//!     loader.leave_bootloader()
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod checksum;
pub mod command;
pub mod error;
pub mod hex;
pub mod image;
pub mod protocol;
pub mod report;
pub mod transport;

pub use command::LoaderCommand;
pub use error::{Error, FormatError, FormatErrorKind, Result};
pub use hex::{HexImage, MemoryChunk};
pub use image::{build_application_image, build_reload_image, DeviceGeometry};
pub use protocol::{FlashLoader, NoProgress, RetryPolicy, Timing, TransferProgress};
pub use report::{ReportLayout, PAGE_SIZE};
pub use transport::{FeatureChannel, FeatureTransport};
