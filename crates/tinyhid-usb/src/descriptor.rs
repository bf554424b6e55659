//! HID report descriptor parsing
//!
//! Only what is needed to find out how large the device's feature report
//! is: global state (report size, count, ID, push/pop) and Feature main
//! items. Long items are skipped.

use crate::error::{Result, UsbError};

const ITEM_TYPE_MAIN: u8 = 0;
const ITEM_TYPE_GLOBAL: u8 = 1;

const MAIN_FEATURE: u8 = 0xB;

const GLOBAL_REPORT_SIZE: u8 = 0x7;
const GLOBAL_REPORT_ID: u8 = 0x8;
const GLOBAL_REPORT_COUNT: u8 = 0x9;
const GLOBAL_PUSH: u8 = 0xA;
const GLOBAL_POP: u8 = 0xB;

const LONG_ITEM_PREFIX: u8 = 0xFE;

#[derive(Debug, Clone, Copy, Default)]
struct GlobalState {
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

/// A feature report declared by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureReport {
    /// Report ID, 0 when the descriptor declares none
    pub id: u8,
    /// Data bits declared for the report
    pub bits: u32,
}

impl FeatureReport {
    /// Bytes on the host side of a transfer, including the report ID byte
    pub fn transfer_size(&self) -> usize {
        self.bits.div_ceil(8) as usize + 1
    }
}

/// Collect the feature reports declared in a report descriptor
///
/// Reports are returned in order of first appearance.
pub fn feature_reports(descriptor: &[u8]) -> Result<Vec<FeatureReport>> {
    let mut reports: Vec<FeatureReport> = Vec::new();
    let mut global = GlobalState::default();
    let mut stack = Vec::new();
    let mut pos = 0;

    while pos < descriptor.len() {
        let prefix = descriptor[pos];

        if prefix == LONG_ITEM_PREFIX {
            let size = *descriptor
                .get(pos + 1)
                .ok_or_else(|| UsbError::Descriptor("truncated long item".into()))?;
            pos += 3 + size as usize;
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let data = descriptor
            .get(pos + 1..pos + 1 + size)
            .ok_or_else(|| UsbError::Descriptor(format!("truncated item at offset {}", pos)))?;
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32);
        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;
        pos += 1 + size;

        match (item_type, tag) {
            (ITEM_TYPE_GLOBAL, GLOBAL_REPORT_SIZE) => global.report_size = value,
            (ITEM_TYPE_GLOBAL, GLOBAL_REPORT_COUNT) => global.report_count = value,
            (ITEM_TYPE_GLOBAL, GLOBAL_REPORT_ID) => global.report_id = value as u8,
            (ITEM_TYPE_GLOBAL, GLOBAL_PUSH) => stack.push(global),
            (ITEM_TYPE_GLOBAL, GLOBAL_POP) => {
                global = stack
                    .pop()
                    .ok_or_else(|| UsbError::Descriptor("pop without push".into()))?;
            }
            (ITEM_TYPE_MAIN, MAIN_FEATURE) => {
                let overflow = || UsbError::Descriptor("feature report size overflows".into());
                let bits = global
                    .report_size
                    .checked_mul(global.report_count)
                    .ok_or_else(overflow)?;
                match reports.iter_mut().find(|r| r.id == global.report_id) {
                    Some(report) => {
                        report.bits = report.bits.checked_add(bits).ok_or_else(overflow)?
                    }
                    None => reports.push(FeatureReport {
                        id: global.report_id,
                        bits,
                    }),
                }
            }
            _ => {}
        }
    }

    Ok(reports)
}

/// Transfer size of the device's single feature report
pub fn feature_report_size(descriptor: &[u8]) -> Result<usize> {
    match feature_reports(descriptor)?.as_slice() {
        [report] => Ok(report.transfer_size()),
        [] => Err(UsbError::Descriptor("no feature report declared".into())),
        reports => Err(UsbError::Descriptor(format!(
            "{} feature reports declared, expected one",
            reports.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader_descriptor(count: u8) -> Vec<u8> {
        vec![
            0x06, 0x00, 0xFF, // usage page (vendor)
            0x09, 0x01, // usage
            0xA1, 0x01, // collection (application)
            0x15, 0x00, // logical minimum
            0x26, 0xFF, 0x00, // logical maximum
            0x75, 0x08, // report size 8
            0x95, count, // report count
            0x09, 0x00, // usage
            0xB2, 0x02, 0x01, // feature (buffered bytes)
            0xC0, // end collection
        ]
    }

    #[test]
    fn test_legacy_firmware_descriptor() {
        assert_eq!(feature_report_size(&loader_descriptor(66)).unwrap(), 67);
    }

    #[test]
    fn test_current_firmware_descriptor() {
        assert_eq!(feature_report_size(&loader_descriptor(68)).unwrap(), 69);
    }

    #[test]
    fn test_push_pop_and_long_items() {
        let descriptor = [
            0x75, 0x08, // report size 8
            0x95, 0x10, // report count 16
            0xA4, // push
            0x95, 0x01, // report count 1
            0x81, 0x02, // input, ignored
            0xB4, // pop
            0xFE, 0x02, 0x10, 0xAA, 0xBB, // long item
            0xB1, 0x02, // feature
        ];
        let reports = feature_reports(&descriptor).unwrap();
        assert_eq!(reports, vec![FeatureReport { id: 0, bits: 128 }]);
        assert_eq!(reports[0].transfer_size(), 17);
    }

    #[test]
    fn test_multiple_feature_reports() {
        let descriptor = [
            0x85, 0x01, 0x75, 0x08, 0x95, 0x04, 0xB1, 0x02, // id 1, 4 bytes
            0x85, 0x02, 0x95, 0x08, 0xB1, 0x02, // id 2, 8 bytes
            0x85, 0x01, 0x95, 0x02, 0xB1, 0x02, // id 1, 2 more bytes
        ];
        let reports = feature_reports(&descriptor).unwrap();
        assert_eq!(
            reports,
            vec![
                FeatureReport { id: 1, bits: 48 },
                FeatureReport { id: 2, bits: 64 }
            ]
        );
        assert!(feature_report_size(&descriptor).is_err());
    }

    #[test]
    fn test_malformed_descriptors() {
        assert!(feature_reports(&[0x95]).is_err());
        assert!(feature_reports(&[0xB4]).is_err());
        assert!(feature_reports(&[0xFE]).is_err());
        assert!(feature_report_size(&[0x75, 0x08]).is_err());
    }

    #[test]
    fn test_oversized_feature_is_rejected() {
        let descriptor = [
            0x77, 0xFF, 0xFF, 0xFF, 0xFF, // report size 0xFFFFFFFF
            0x97, 0xFF, 0xFF, 0xFF, 0xFF, // report count 0xFFFFFFFF
            0xB1, 0x02, // feature
        ];
        assert!(matches!(feature_reports(&descriptor), Err(UsbError::Descriptor(_))));

        let descriptor = [
            0x77, 0x00, 0x00, 0x00, 0x80, // report size 0x80000000
            0x95, 0x01, // report count 1
            0xB1, 0x02, // feature
            0xB1, 0x02, // feature
        ];
        assert!(matches!(feature_reports(&descriptor), Err(UsbError::Descriptor(_))));
    }
}
