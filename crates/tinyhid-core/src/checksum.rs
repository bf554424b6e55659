//! Report checksums
//!
//! Both algorithms are reflected (LSB-first) CRCs:
//! - CRC-8 with polynomial 0x8C (0x31 reflected), seed 0. This is the
//!   Dallas/Maxim 1-Wire CRC that avr-libc exposes as `_crc_ibutton_update`.
//! - CRC-16 with polynomial 0xA001 (0x8005 reflected), seed 0xFFFF and no
//!   final xor, i.e. CRC-16/MODBUS as computed by `_crc16_update`.

use crc::{Crc, CRC_16_MODBUS, CRC_8_MAXIM_DOW};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-8 (poly 0x8C, LSB-first, seed 0) over `data`
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// CRC-16 (poly 0xA001, LSB-first, seed 0xFFFF) over `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
