//! Intel HEX record writer

use ihex::Record;

use super::HexImage;
use crate::error::Result;

/// Record terminating every serialized image
pub const END_OF_FILE_RECORD: &str = ":00000001FF";

/// Data bytes per emitted record
const RECORD_DATA_LEN: usize = 16;

/// Serialize an image into Intel HEX lines
///
/// Only 16-bit addresses are emitted: chunks above 64 KiB wrap around
/// since no extended address records are written.
pub fn serialize(image: &HexImage) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for chunk in image.chunks() {
        let mut address = chunk.offset as u16;
        for segment in chunk.data.chunks(RECORD_DATA_LEN) {
            let record = Record::Data {
                offset: address,
                value: segment.to_vec(),
            };
            lines.push(record.to_record_string()?);
            address = address.wrapping_add(RECORD_DATA_LEN as u16);
        }
    }
    lines.push(Record::EndOfFile.to_record_string()?);
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sample_record() {
        let data = [
            0x21, 0x46, 0x01, 0x36, 0x01, 0x21, 0x47, 0x01, 0x36, 0x00, 0x7E, 0xFE, 0x09, 0xD2,
            0x19, 0x01,
        ];
        let image = HexImage::from_chunk(0x0100, data.to_vec());
        assert_eq!(
            serialize(&image).unwrap(),
            vec![
                ":10010000214601360121470136007EFE09D2190140".to_string(),
                END_OF_FILE_RECORD.to_string(),
            ]
        );
    }

    #[test]
    fn test_splits_into_16_byte_records() {
        let image = HexImage::from_chunk(0, vec![0xFF; 40]);
        let lines = serialize(&image).unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with(":10000000"));
        assert!(lines[1].starts_with(":10001000"));
        assert!(lines[2].starts_with(":08002000"));
        assert_eq!(lines[3], ":00000001FF");
    }

    #[test]
    fn test_empty_image_is_just_end_record() {
        assert_eq!(serialize(&HexImage::new()).unwrap(), vec![END_OF_FILE_RECORD.to_string()]);
    }

    #[test]
    fn test_address_wraps_at_64k() {
        let image = HexImage::from_chunk(0x1_0010, vec![0x55]);
        assert_eq!(serialize(&image).unwrap()[0], ":01001000559A");
    }
}
