//! Flat flash images
//!
//! The bootloader lives at the top of flash. Everything below it is the
//! application region, except the last 4 bytes before the bootloader: the
//! device stores the application's relocated reset and interrupt vectors
//! there, so the host never writes or reads them as application data.

use crate::checksum::crc16;
use crate::error::{Error, Result};
use crate::hex::HexImage;
use crate::report::PAGE_SIZE;

/// Value of erased flash
pub const ERASED_BYTE: u8 = 0xFF;

/// Bytes below the bootloader reserved for relocated vectors
pub const BOOTLOADER_RESERVED_TAIL: usize = 4;

/// Offset of the reloader info block (bootloader address and CRC)
pub const RELOADER_INFO: usize = 0x0280;

/// `rjmp` at the reset vector into the reloader
pub const RELOADER_JUMP: [u8; 2] = [0x20, 0xC0];

/// Flash geometry of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceGeometry {
    /// Bytes per flash page (equal to the report payload capacity)
    pub page_size: usize,
    /// First byte of the bootloader
    pub bootloader_start: usize,
    /// Total flash size
    pub flash_size: usize,
}

impl Default for DeviceGeometry {
    /// ATtiny85 with a 2 KiB bootloader
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            bootloader_start: 0x1800,
            flash_size: 0x2000,
        }
    }
}

impl DeviceGeometry {
    /// Geometry with the standard page size, checked with [`Self::validate`]
    pub fn new(bootloader_start: usize, flash_size: usize) -> Result<Self> {
        let geometry = Self {
            page_size: PAGE_SIZE,
            bootloader_start,
            flash_size,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check that the bootloader lies inside flash and leaves at least one
    /// application page
    pub fn validate(&self) -> Result<()> {
        if self.bootloader_start > self.flash_size {
            return Err(Error::InvalidImage(format!(
                "bootloader start 0x{:04X} is past the end of flash (0x{:04X})",
                self.bootloader_start, self.flash_size
            )));
        }
        if self.page_size == 0 || self.application_limit() < self.page_size {
            return Err(Error::InvalidImage(format!(
                "bootloader start 0x{:04X} leaves no room for a {}-byte application page",
                self.bootloader_start, self.page_size
            )));
        }
        Ok(())
    }

    /// Number of bytes the host may read or write
    pub fn application_limit(&self) -> usize {
        self.bootloader_start.saturating_sub(BOOTLOADER_RESERVED_TAIL)
    }

    /// Number of pages a full write covers
    pub fn application_pages(&self) -> usize {
        self.application_limit().div_ceil(self.page_size)
    }
}

/// Flatten a HEX image into an erased application buffer
///
/// The buffer covers `[0, application_limit)`; addresses not present in
/// the HEX image stay `0xFF`. Data at or past the limit is rejected so the
/// bootloader can never be overwritten.
pub fn build_application_image(image: &HexImage, geometry: &DeviceGeometry) -> Result<Vec<u8>> {
    geometry.validate()?;
    let limit = geometry.application_limit();
    if image.end() as usize > limit {
        return Err(Error::ImageTooLarge {
            needed: image.end() as usize,
            available: limit,
        });
    }
    let mut program = vec![ERASED_BYTE; limit];
    image.fill_absolute(&mut program)?;
    Ok(program)
}

/// Build the application image that replaces the bootloader itself
///
/// The image starts with a jump into `reloader`, which must fit below
/// [`RELOADER_INFO`]. The new bootloader is stored one page after the
/// info block; the info block records the bootloader's flash address and
/// a CRC-16 over `flash_size - address` bytes of it, both little-endian.
pub fn build_reload_image(
    reloader: &HexImage,
    bootloader: &HexImage,
    geometry: &DeviceGeometry,
) -> Result<Vec<u8>> {
    geometry.validate()?;
    let limit = geometry.application_limit();
    if RELOADER_INFO + BOOTLOADER_RESERVED_TAIL > limit {
        return Err(Error::ImageTooLarge {
            needed: RELOADER_INFO + BOOTLOADER_RESERVED_TAIL,
            available: limit,
        });
    }
    let mut program = vec![ERASED_BYTE; limit];
    program[..RELOADER_JUMP.len()].copy_from_slice(&RELOADER_JUMP);

    if reloader.end() as usize > RELOADER_INFO {
        return Err(Error::InvalidImage(format!(
            "reloader too big: ends at 0x{:04X}, info block at 0x{:04X}",
            reloader.end(),
            RELOADER_INFO
        )));
    }
    reloader.fill_absolute(&mut program)?;

    let address = bootloader.offset() as usize;
    if bootloader.is_empty() || bootloader.end() as usize > geometry.flash_size {
        return Err(Error::InvalidImage(format!(
            "bootloader must be non-empty and end below 0x{:04X}",
            geometry.flash_size
        )));
    }
    let size = geometry.flash_size - address;
    let data_start = RELOADER_INFO + geometry.page_size;
    if data_start + size > limit {
        return Err(Error::ImageTooLarge {
            needed: data_start + size,
            available: limit,
        });
    }
    bootloader.fill(&mut program, data_start)?;

    let crc = crc16(&program[data_start..data_start + size]);
    program[RELOADER_INFO..RELOADER_INFO + 2].copy_from_slice(&(address as u16).to_le_bytes());
    program[RELOADER_INFO + 2..RELOADER_INFO + 4].copy_from_slice(&crc.to_le_bytes());

    log::debug!(
        "reload image: bootloader 0x{:04X} ({} bytes) stored at 0x{:04X}, crc 0x{:04X}",
        address,
        size,
        data_start,
        crc
    );
    Ok(program)
}
