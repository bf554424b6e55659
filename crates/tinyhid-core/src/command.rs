//! Bootloader command bits
//!
//! The command byte of every outbound report is a bit set. The device
//! executes the set bits in a fixed order: erase flash (which also rewinds
//! its write cursor), fill the page buffer, write the page, erase EEPROM,
//! leave the bootloader. A command byte of zero requests a flash read and
//! rewinds the read cursor.

use bitflags::bitflags;

bitflags! {
    /// Command bits carried in the command byte of a report
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoaderCommand: u8 {
        /// Move the write cursor to the byte offset in the payload
        const SET_ADDRESS      = 0x01;
        /// Append payload bytes to the page buffer at the write cursor
        const FILL_FLASH       = 0x02;
        /// Commit the page buffer to flash and advance the cursor
        const WRITE_FLASH      = 0x10;
        /// Erase all application flash and rewind the write cursor
        const ERASE_FLASH      = 0x20;
        /// Erase the whole EEPROM
        const ERASE_EEPROM     = 0x40;
        /// Jump to the application
        const LEAVE_BOOTLOADER = 0x80;
    }
}

impl LoaderCommand {
    /// Read flash from the start; the read command has no bits set
    pub const READ_FLASH: LoaderCommand = LoaderCommand::empty();

    /// Whether the device needs erase settle time after this command
    pub fn erases(self) -> bool {
        self.contains(LoaderCommand::ERASE_FLASH)
    }
}
