//! Error types for the USB transport

use thiserror::Error;

/// Result type for USB operations
pub type Result<T> = std::result::Result<T, UsbError>;

/// Errors that can occur talking to the bootloader over USB
#[derive(Debug, Error)]
pub enum UsbError {
    /// No matching device
    #[error("TinyHID bootloader not found")]
    DeviceNotFound,
    /// Failed to enumerate or open the device
    #[error("failed to open device: {0}")]
    OpenFailed(String),
    /// Device has no HID interface
    #[error("device has no HID interface")]
    NoHidInterface,
    /// Failed to claim the HID interface
    #[error("failed to claim interface: {0}")]
    ClaimFailed(String),
    /// Control transfer failed
    #[error("USB transfer failed: {0}")]
    TransferFailed(String),
    /// Device returned less data than a full report
    #[error("short report: got {got} bytes, expected {expected}")]
    ShortReport {
        /// Bytes received
        got: usize,
        /// Bytes expected
        expected: usize,
    },
    /// Report descriptor could not be used
    #[error("bad HID report descriptor: {0}")]
    Descriptor(String),
    /// Core library error
    #[error(transparent)]
    Core(#[from] tinyhid_core::Error),
}

impl UsbError {
    /// Whether the failure may clear up once the device finishes enumerating
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UsbError::OpenFailed(_) | UsbError::ClaimFailed(_) | UsbError::TransferFailed(_)
        )
    }
}

impl From<nusb::Error> for UsbError {
    fn from(e: nusb::Error) -> Self {
        UsbError::OpenFailed(e.to_string())
    }
}

impl From<UsbError> for tinyhid_core::Error {
    fn from(e: UsbError) -> Self {
        match e {
            UsbError::DeviceNotFound => tinyhid_core::Error::DeviceNotFound,
            UsbError::Core(e) => e,
            e => tinyhid_core::Error::Transport(e.to_string()),
        }
    }
}
