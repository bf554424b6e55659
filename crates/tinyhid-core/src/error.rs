//! Error types for tinyhid-core

use std::fmt;

use thiserror::Error;

/// What was wrong with a rejected Intel HEX line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatErrorKind {
    /// Line is shorter than the minimal `:LLAAAATTCC` record
    TooShort,
    /// Line does not start with `:`
    MissingColon,
    /// A field contains something other than hex digits
    InvalidHexDigit,
    /// Declared byte count does not match the line length
    LengthMismatch {
        /// Byte count declared in the `LL` field
        declared: usize,
        /// Characters actually present on the line
        actual: usize,
    },
    /// Record checksum does not sum to zero
    BadChecksum,
    /// Record type other than 00, 01, 02 or 04
    UnsupportedRecordType(u8),
    /// Extended address record with the wrong payload size
    BadAddressRecord,
    /// Any record after the end-of-file record
    DataAfterEnd,
    /// Input ended without an end-of-file record
    MissingEnd,
}

impl fmt::Display for FormatErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "line too short"),
            Self::MissingColon => write!(f, "missing ':' start code"),
            Self::InvalidHexDigit => write!(f, "invalid hex digit"),
            Self::LengthMismatch { declared, actual } => write!(
                f,
                "invalid length: {} data bytes declared but line has {} characters",
                declared, actual
            ),
            Self::BadChecksum => write!(f, "invalid checksum"),
            Self::UnsupportedRecordType(t) => write!(f, "unsupported record type {:02X}", t),
            Self::BadAddressRecord => write!(f, "extended address record must carry 2 bytes"),
            Self::DataAfterEnd => write!(f, "data line after end of file record"),
            Self::MissingEnd => write!(f, "no end of file record found"),
        }
    }
}

/// Malformed Intel HEX input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid HEX at line {line}: {kind}")]
pub struct FormatError {
    /// 1-based line number in the input (0 when the whole input is at fault)
    pub line: usize,
    /// What was wrong with it
    pub kind: FormatErrorKind,
}

impl FormatError {
    pub(crate) fn new(line: usize, kind: FormatErrorKind) -> Self {
        Self { line, kind }
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed HEX input
    #[error(transparent)]
    Format(#[from] FormatError),

    /// HEX record could not be encoded
    #[error("HEX write error: {0}")]
    HexWrite(#[from] ihex::WriterError),

    /// Feature report transfer failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound report failed checksum verification
    #[error("transfer fails, report checksum mismatch, try again")]
    ChecksumMismatch,

    /// No matching bootloader device
    #[error("device not found")]
    DeviceNotFound,

    /// Retry and fallback budget exhausted while writing a page
    #[error("can't write at 0x{offset:04X}: retry budget exhausted")]
    ProtocolExhausted {
        /// Byte offset of the page that could not be written
        offset: usize,
    },

    /// Device reports a feature size no known layout uses
    #[error("unsupported feature report size {0} (expected 67 or 69)")]
    UnsupportedReportSize(usize),

    /// Image data does not fit the target region
    #[error("image too large: needs {needed} bytes, {available} available")]
    ImageTooLarge {
        /// Bytes the image needs
        needed: usize,
        /// Bytes available in the target
        available: usize,
    },

    /// Image cannot be built from the given inputs
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Operation was cancelled between transfers
    #[error("operation cancelled")]
    Cancelled,

    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a transport-class failure that a caller may retry
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::ChecksumMismatch)
    }
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
