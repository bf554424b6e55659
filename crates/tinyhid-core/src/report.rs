//! HID feature report framing
//!
//! Every exchange with the bootloader is one fixed-size feature report.
//! Byte 0 is the HID report ID (always 0, the device declares a single
//! report). The remaining fields sit at offsets described by a
//! [`ReportLayout`]; two layouts exist in deployed bootloaders:
//!
//! ```text
//! legacy  (67 bytes): [id][cmd][crc8][payload x64]
//! current (69 bytes): [id][cmd][!cmd][crc16 lo][crc16 hi][payload x64]
//! ```
//!
//! The checksum always covers the payload region only. The guard byte,
//! when present, holds the bitwise complement of the command byte so the
//! device can reject a corrupted command even when the payload is intact.

use crate::checksum::{crc16, crc8};
use crate::command::LoaderCommand;
use crate::error::{Error, Result};

/// Bytes of flash carried by one report
pub const PAGE_SIZE: usize = 64;

/// Checksum algorithm protecting the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// One byte CRC-8
    Crc8,
    /// Two byte CRC-16, little-endian
    Crc16,
}

impl ChecksumKind {
    /// Width of the checksum field in bytes
    pub const fn width(self) -> usize {
        match self {
            ChecksumKind::Crc8 => 1,
            ChecksumKind::Crc16 => 2,
        }
    }
}

/// Field offsets of a bootloader feature report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    /// Human readable name
    pub name: &'static str,
    /// Total report size including the report ID byte
    pub report_size: usize,
    /// Offset of the command byte
    pub command: usize,
    /// Offset of the command-complement guard byte, if any
    pub guard: Option<usize>,
    /// Offset of the checksum field
    pub checksum: usize,
    /// Checksum algorithm and field width
    pub checksum_kind: ChecksumKind,
    /// Offset of the payload
    pub payload: usize,
    /// Payload capacity in bytes
    pub payload_len: usize,
}

impl ReportLayout {
    /// 1-byte CRC-8, no guard byte
    pub const LEGACY: ReportLayout = ReportLayout {
        name: "legacy",
        report_size: PAGE_SIZE + 3,
        command: 1,
        guard: None,
        checksum: 2,
        checksum_kind: ChecksumKind::Crc8,
        payload: 3,
        payload_len: PAGE_SIZE,
    };

    /// 2-byte CRC-16 plus command-complement guard byte
    pub const CURRENT: ReportLayout = ReportLayout {
        name: "current",
        report_size: PAGE_SIZE + 5,
        command: 1,
        guard: Some(2),
        checksum: 3,
        checksum_kind: ChecksumKind::Crc16,
        payload: 5,
        payload_len: PAGE_SIZE,
    };

    /// All known layouts
    pub const ALL: [ReportLayout; 2] = [ReportLayout::LEGACY, ReportLayout::CURRENT];

    /// Pick the layout matching the feature report size a device declares
    pub fn for_report_size(size: usize) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.report_size == size)
            .ok_or(Error::UnsupportedReportSize(size))
    }

    /// A zero-filled report buffer
    pub fn empty_report(&self) -> Vec<u8> {
        vec![0u8; self.report_size]
    }

    /// Build and sign a command report
    ///
    /// The payload is zero-padded to the layout's capacity.
    pub fn build_command(&self, command: LoaderCommand, payload: &[u8]) -> Vec<u8> {
        debug_assert!(payload.len() <= self.payload_len);
        let mut report = self.empty_report();
        report[self.command] = command.bits();
        let len = payload.len().min(self.payload_len);
        report[self.payload..self.payload + len].copy_from_slice(&payload[..len]);
        if let Some(guard) = self.guard {
            report[guard] = !command.bits();
        }
        self.sign(&mut report);
        report
    }

    /// Payload region of a report
    pub fn payload<'a>(&self, report: &'a [u8]) -> &'a [u8] {
        &report[self.payload..self.payload + self.payload_len]
    }

    /// Mutable payload region of a report; re-sign after changing it
    pub fn payload_mut<'a>(&self, report: &'a mut [u8]) -> &'a mut [u8] {
        &mut report[self.payload..self.payload + self.payload_len]
    }

    /// Command bits of a report, or `None` if the guard byte disagrees
    pub fn command(&self, report: &[u8]) -> Option<LoaderCommand> {
        let bits = report[self.command];
        match self.guard {
            Some(guard) if report[guard] != !bits => None,
            _ => Some(LoaderCommand::from_bits_retain(bits)),
        }
    }

    fn compute_checksum(&self, report: &[u8]) -> u16 {
        let payload = self.payload(report);
        match self.checksum_kind {
            ChecksumKind::Crc8 => crc8(payload) as u16,
            ChecksumKind::Crc16 => crc16(payload),
        }
    }

    fn stored_checksum(&self, report: &[u8]) -> u16 {
        match self.checksum_kind {
            ChecksumKind::Crc8 => report[self.checksum] as u16,
            ChecksumKind::Crc16 => {
                u16::from_le_bytes([report[self.checksum], report[self.checksum + 1]])
            }
        }
    }

    /// Write the payload checksum into the checksum field
    pub fn sign(&self, report: &mut [u8]) {
        let crc = self.compute_checksum(report);
        let width = self.checksum_kind.width();
        report[self.checksum..self.checksum + width].copy_from_slice(&crc.to_le_bytes()[..width]);
    }

    /// Whether the stored checksum matches the payload
    pub fn verify(&self, report: &[u8]) -> bool {
        report.len() == self.report_size
            && self.stored_checksum(report) == self.compute_checksum(report)
    }
}
