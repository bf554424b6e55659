//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal u16
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let value = parse_hex_u32(s)?;
    u16::try_from(value).map_err(|_| format!("Value out of range: {}", s))
}

#[derive(Parser)]
#[command(name = "tinyhid")]
#[command(author, version, about = "TinyHID USB bootloader flasher", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Report layout selection
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LayoutChoice {
    /// Pick from the feature report size the device declares
    #[default]
    Auto,
    /// 67-byte reports with CRC-8
    Legacy,
    /// 69-byte reports with CRC-16 and command guard
    Current,
}

/// Device selection and geometry options shared across commands
#[derive(clap::Args, Debug, Clone)]
pub struct DeviceArgs {
    /// USB vendor ID
    #[arg(long, global = true, default_value = "0x16C0", value_parser = parse_hex_u16)]
    pub vid: u16,

    /// USB product ID
    #[arg(long, global = true, default_value = "0x05DF", value_parser = parse_hex_u16)]
    pub pid: u16,

    /// Manufacturer string the device must report
    #[arg(long, global = true, default_value = "deli.su")]
    pub manufacturer: String,

    /// Product string the device must report
    #[arg(long, global = true, default_value = "TinyHID Loader")]
    pub product: String,

    /// Report layout
    #[arg(long, global = true, value_enum, default_value_t = LayoutChoice::Auto)]
    pub layout: LayoutChoice,

    /// Seconds to keep polling for the device (0 = look once)
    #[arg(long, global = true, default_value_t = 0)]
    pub timeout: u64,

    /// Use the in-memory emulated bootloader instead of USB
    #[arg(long, global = true)]
    pub dummy: bool,

    /// First byte of the bootloader in flash
    #[arg(long, global = true, default_value = "0x1800", value_parser = parse_hex_u32)]
    pub bootloader_start: u32,

    /// Total flash size
    #[arg(long, global = true, default_value = "0x2000", value_parser = parse_hex_u32)]
    pub flash_size: u32,
}

/// What to do after a write
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Stay in the bootloader
    #[value(name = "notleave", alias = "noleave")]
    NotLeave,
}

/// Memory to erase
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseTarget {
    /// Application flash
    Flash,
    /// EEPROM
    Eeprom,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write an Intel HEX file to flash, then start the application
    Write {
        /// Input HEX file
        input: PathBuf,

        /// Pass `notleave` to stay in the bootloader afterwards
        #[arg(value_enum)]
        mode: Option<WriteMode>,
    },

    /// Read application flash to an Intel HEX file
    Read {
        /// Output HEX file
        output: PathBuf,
    },

    /// Erase application flash or EEPROM
    Erase {
        /// What to erase
        #[arg(value_enum)]
        target: EraseTarget,
    },

    /// Leave the bootloader and start the application
    Leave,

    /// Replace the bootloader itself using a reloader application
    Reload {
        /// Reloader HEX file
        reloader: PathBuf,

        /// New bootloader HEX file
        bootloader: PathBuf,
    },

    /// Show the discovered device and its report layout
    Info,
}
