//! Intel HEX record parser

use ihex::{ReaderError, Record};

use super::HexImage;
use crate::error::{FormatError, FormatErrorKind};

/// Parse Intel HEX lines into a memory image
///
/// Blank lines are skipped and surrounding whitespace (including a
/// trailing `\r`) is ignored. Supported record types are data (00),
/// end of file (01), extended segment address (02) and extended linear
/// address (04). Every record's checksum is verified, and the input must
/// contain an end of file record with nothing after it.
pub fn parse<I, S>(lines: I) -> Result<HexImage, FormatError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut image = HexImage::new();
    let mut base: u64 = 0;
    let mut seen_end = false;

    for (index, raw) in lines.into_iter().enumerate() {
        let line_no = index + 1;
        let line = raw.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        if seen_end {
            return Err(FormatError::new(line_no, FormatErrorKind::DataAfterEnd));
        }

        let record = Record::from_record_string(line)
            .map_err(|e| FormatError::new(line_no, record_error(line, e)))?;

        match record {
            Record::Data { offset, value } => image.append_data(base + offset as u64, value),
            Record::EndOfFile => seen_end = true,
            Record::ExtendedSegmentAddress(segment) => {
                base = (segment as u64) << 4;
                log::trace!("line {}: segment base 0x{:X}", line_no, base);
            }
            Record::ExtendedLinearAddress(upper) => {
                base = (upper as u64) << 16;
                log::trace!("line {}: linear base 0x{:X}", line_no, base);
            }
            Record::StartSegmentAddress { .. } => {
                return Err(FormatError::new(
                    line_no,
                    FormatErrorKind::UnsupportedRecordType(0x03),
                ))
            }
            Record::StartLinearAddress(_) => {
                return Err(FormatError::new(
                    line_no,
                    FormatErrorKind::UnsupportedRecordType(0x05),
                ))
            }
        }
    }

    if !seen_end {
        return Err(FormatError::new(0, FormatErrorKind::MissingEnd));
    }
    Ok(image)
}

fn record_error(line: &str, error: ReaderError) -> FormatErrorKind {
    match error {
        ReaderError::MissingStartCode => FormatErrorKind::MissingColon,
        ReaderError::RecordTooShort => FormatErrorKind::TooShort,
        ReaderError::ContainsInvalidCharacters => FormatErrorKind::InvalidHexDigit,
        ReaderError::ChecksumMismatch(..) => FormatErrorKind::BadChecksum,
        ReaderError::UnsupportedRecordType(kind) => FormatErrorKind::UnsupportedRecordType(kind),
        ReaderError::InvalidLengthForType => FormatErrorKind::BadAddressRecord,
        ReaderError::PayloadLengthMismatch
        | ReaderError::RecordNotEvenLength
        | ReaderError::RecordTooLong => FormatErrorKind::LengthMismatch {
            declared: line
                .get(1..3)
                .and_then(|count| u8::from_str_radix(count, 16).ok())
                .map_or(0, usize::from),
            actual: line.len(),
        },
    }
}
