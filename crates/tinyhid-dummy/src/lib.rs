//! tinyhid-dummy - In-memory TinyHID bootloader emulator for testing
//!
//! This crate provides a [`FeatureTransport`] that behaves like a TinyHID
//! bootloader: it verifies report checksums, executes command bits and
//! serves flash reads, all against flash and EEPROM kept in memory. Faults
//! can be injected to exercise the host's retry paths without hardware.
//!
//! The device state is shared between clones, so a test can keep one handle
//! for inspection while a [`FlashLoader`](tinyhid_core::FlashLoader) owns
//! another.

use std::sync::{Arc, Mutex, MutexGuard};

use tinyhid_core::error::{Error, Result};
use tinyhid_core::image::ERASED_BYTE;
use tinyhid_core::protocol::FILL_CHUNK;
use tinyhid_core::{DeviceGeometry, FeatureChannel, FeatureTransport, LoaderCommand, ReportLayout};

/// Configuration for the emulated device
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Report layout the firmware speaks
    pub layout: ReportLayout,
    /// Flash geometry
    pub geometry: DeviceGeometry,
    /// EEPROM size in bytes
    pub eeprom_size: usize,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            layout: ReportLayout::CURRENT,
            geometry: DeviceGeometry::default(),
            eeprom_size: 512,
        }
    }
}

/// Counters describing how the host used the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Channels opened
    pub opens: usize,
    /// Channels closed
    pub closes: usize,
    /// Feature reports accepted
    pub reports_accepted: usize,
    /// Feature reports rejected (injected failures and bad checksums)
    pub reports_rejected: usize,
    /// Feature reports served
    pub reports_served: usize,
    /// Times the bootloader was told to start the application
    pub leaves: usize,
}

struct DeviceState {
    config: DummyConfig,
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    write_cursor: usize,
    read_cursor: usize,
    page: Vec<u8>,
    fill_pos: usize,
    fail_sets: usize,
    corrupt_reads: usize,
    stats: DummyStats,
}

impl DeviceState {
    fn new(config: DummyConfig) -> Self {
        let page_size = config.geometry.page_size;
        Self {
            flash: vec![ERASED_BYTE; config.geometry.flash_size],
            eeprom: vec![ERASED_BYTE; config.eeprom_size],
            write_cursor: 0,
            read_cursor: 0,
            page: vec![ERASED_BYTE; page_size],
            fill_pos: 0,
            fail_sets: 0,
            corrupt_reads: 0,
            stats: DummyStats::default(),
            config,
        }
    }

    fn reset_page(&mut self) {
        self.page.fill(ERASED_BYTE);
        self.fill_pos = 0;
    }

    fn handle_set(&mut self, report: &[u8]) -> Result<()> {
        if self.fail_sets > 0 {
            self.fail_sets -= 1;
            self.stats.reports_rejected += 1;
            return Err(Error::Transport("injected SET_REPORT failure".into()));
        }

        let layout = self.config.layout;
        if report.len() != layout.report_size || !layout.verify(report) {
            self.stats.reports_rejected += 1;
            return Err(Error::Transport("device stalled: bad report checksum".into()));
        }
        let Some(command) = layout.command(report) else {
            self.stats.reports_rejected += 1;
            return Err(Error::Transport("device stalled: bad command guard".into()));
        };
        self.stats.reports_accepted += 1;

        let payload = layout.payload(report);
        log::trace!("dummy: command {:?}", command);

        if command == LoaderCommand::READ_FLASH {
            self.read_cursor = 0;
            return Ok(());
        }

        if command.contains(LoaderCommand::ERASE_FLASH) {
            let end = self.config.geometry.bootloader_start;
            self.flash[..end].fill(ERASED_BYTE);
            self.write_cursor = 0;
            self.reset_page();
        }
        if command.contains(LoaderCommand::SET_ADDRESS) {
            let mut address = [0u8; 4];
            address.copy_from_slice(&payload[..4]);
            self.write_cursor = u32::from_le_bytes(address) as usize;
            self.reset_page();
        }
        if command.contains(LoaderCommand::FILL_FLASH) {
            // A fill committed in the same report carries the whole page
            let count = if command.contains(LoaderCommand::WRITE_FLASH) {
                self.page.len()
            } else {
                FILL_CHUNK
            };
            let start = self.fill_pos.min(self.page.len());
            let end = (start + count).min(self.page.len());
            self.page[start..end].copy_from_slice(&payload[..end - start]);
            self.fill_pos = end;
        }
        if command.contains(LoaderCommand::WRITE_FLASH) {
            self.commit_page();
        }
        if command.contains(LoaderCommand::ERASE_EEPROM) {
            self.eeprom.fill(ERASED_BYTE);
        }
        if command.contains(LoaderCommand::LEAVE_BOOTLOADER) {
            self.stats.leaves += 1;
        }
        Ok(())
    }

    fn commit_page(&mut self) {
        let start = self.write_cursor;
        let end = (start + self.page.len()).min(self.config.geometry.bootloader_start);
        if start < end {
            // Programming can only clear bits
            for (cell, &byte) in self.flash[start..end].iter_mut().zip(&self.page) {
                *cell &= byte;
            }
        }
        self.write_cursor = start + self.page.len();
        self.reset_page();
    }

    fn handle_get(&mut self, report: &mut [u8]) -> Result<()> {
        let layout = self.config.layout;
        if report.len() != layout.report_size {
            return Err(Error::Transport(format!(
                "GET_REPORT buffer of {} bytes, device sends {}",
                report.len(),
                layout.report_size
            )));
        }

        report.fill(0);
        let start = self.read_cursor;
        for (i, byte) in layout.payload_mut(report).iter_mut().enumerate() {
            *byte = self.flash.get(start + i).copied().unwrap_or(ERASED_BYTE);
        }
        layout.sign(report);
        self.read_cursor += layout.payload_len;

        if self.corrupt_reads > 0 {
            self.corrupt_reads -= 1;
            layout.payload_mut(report)[0] ^= 0x01;
        }
        self.stats.reports_served += 1;
        Ok(())
    }
}

/// Emulated TinyHID bootloader
#[derive(Clone)]
pub struct DummyBootloader {
    state: Arc<Mutex<DeviceState>>,
    report_size: usize,
}

impl DummyBootloader {
    /// Create an emulated device with erased flash
    pub fn new(config: DummyConfig) -> Self {
        let report_size = config.layout.report_size;
        Self {
            state: Arc::new(Mutex::new(DeviceState::new(config))),
            report_size,
        }
    }

    /// Create an emulated ATtiny85 speaking the current layout
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create an emulated device with pre-filled flash
    pub fn with_flash(config: DummyConfig, initial: &[u8]) -> Self {
        let device = Self::new(config);
        if let Ok(mut state) = device.state.lock() {
            let len = initial.len().min(state.flash.len());
            state.flash[..len].copy_from_slice(&initial[..len]);
        }
        device
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeviceState>> {
        lock_state(&self.state)
    }

    /// Copy of the whole flash
    pub fn flash(&self) -> Result<Vec<u8>> {
        Ok(self.lock()?.flash.clone())
    }

    /// Copy of the EEPROM
    pub fn eeprom(&self) -> Result<Vec<u8>> {
        Ok(self.lock()?.eeprom.clone())
    }

    /// Overwrite EEPROM contents starting at byte 0
    pub fn load_eeprom(&self, data: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        let len = data.len().min(state.eeprom.len());
        state.eeprom[..len].copy_from_slice(&data[..len]);
        Ok(())
    }

    /// Reject the next `count` SET_REPORT transfers
    pub fn fail_next_sets(&self, count: usize) -> Result<()> {
        self.lock()?.fail_sets = count;
        Ok(())
    }

    /// Flip a payload bit in the next served report, after signing it
    pub fn corrupt_next_read(&self) -> Result<()> {
        self.lock()?.corrupt_reads += 1;
        Ok(())
    }

    /// Usage counters
    pub fn stats(&self) -> Result<DummyStats> {
        Ok(self.lock()?.stats)
    }
}

fn lock_state(state: &Mutex<DeviceState>) -> Result<MutexGuard<'_, DeviceState>> {
    state
        .lock()
        .map_err(|_| Error::Transport("emulator state poisoned".into()))
}

/// Open channel to a [`DummyBootloader`]
pub struct DummyChannel {
    state: Arc<Mutex<DeviceState>>,
}

impl FeatureChannel for DummyChannel {
    fn set_feature_report(&mut self, report: &[u8]) -> Result<()> {
        lock_state(&self.state)?.handle_set(report)
    }

    fn get_feature_report(&mut self, report: &mut [u8]) -> Result<()> {
        lock_state(&self.state)?.handle_get(report)
    }
}

impl Drop for DummyChannel {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.stats.closes += 1;
        }
    }
}

impl FeatureTransport for DummyBootloader {
    type Channel = DummyChannel;

    fn open(&mut self) -> Result<DummyChannel> {
        self.lock()?.stats.opens += 1;
        log::debug!("dummy: device opened");
        Ok(DummyChannel {
            state: self.state.clone(),
        })
    }

    fn report_size(&self) -> usize {
        self.report_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tinyhid_core::{build_application_image, FlashLoader, HexImage, NoProgress, RetryPolicy, Timing};

    fn loader(device: &DummyBootloader) -> FlashLoader<DummyBootloader> {
        FlashLoader::new(device.clone())
            .unwrap()
            .with_timing(Timing::none())
            .with_retry_policy(RetryPolicy {
                backoff: Duration::ZERO,
                ..RetryPolicy::default()
            })
    }

    fn legacy_device() -> DummyBootloader {
        DummyBootloader::new(DummyConfig {
            layout: ReportLayout::LEGACY,
            ..DummyConfig::default()
        })
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_write_then_read_back_both_layouts() {
        for device in [DummyBootloader::new_default(), legacy_device()] {
            let geometry = DeviceGeometry::default();
            let limit = geometry.application_limit();
            let program = pattern(limit);

            let mut loader = loader(&device);
            assert_eq!(loader.write_flash(&program, limit, &mut NoProgress).unwrap(), limit);
            assert_eq!(&device.flash().unwrap()[..limit], &program[..]);

            let mut readback = vec![0u8; limit];
            assert_eq!(loader.read_flash(&mut readback, limit, &mut NoProgress).unwrap(), limit);
            assert_eq!(readback, program);

            let stats = device.stats().unwrap();
            assert_eq!(stats.opens, 2);
            assert_eq!(stats.closes, 2);
            assert_eq!(stats.reports_accepted, geometry.application_pages() + 1);
            assert_eq!(stats.reports_served, geometry.application_pages());
        }
    }

    #[test]
    fn test_short_image_padded_with_erased_flash() {
        let device = DummyBootloader::with_flash(DummyConfig::default(), &[0u8; 0x2000]);
        let image = HexImage::from_chunk(0, vec![0x12, 0x34, 0x56]);
        let geometry = DeviceGeometry::default();
        let program = build_application_image(&image, &geometry).unwrap();

        loader(&device)
            .write_flash(&program, geometry.application_limit(), &mut NoProgress)
            .unwrap();

        let flash = device.flash().unwrap();
        assert_eq!(&flash[..3], &[0x12, 0x34, 0x56]);
        assert!(flash[3..0x1800].iter().all(|&b| b == 0xFF));
        // Bootloader region untouched
        assert!(flash[0x1800..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fifteen_failures_recovered_by_parts() {
        let device = DummyBootloader::new_default();
        let program = pattern(256);
        device.fail_next_sets(15).unwrap();

        loader(&device).write_flash(&program, 256, &mut NoProgress).unwrap();
        assert_eq!(&device.flash().unwrap()[..256], &program[..]);

        let stats = device.stats().unwrap();
        assert_eq!(stats.reports_rejected, 15);
        // Page 0 by parts (address, 16 fills, commit), three pages fast
        assert_eq!(stats.reports_accepted, 18 + 3);
    }

    #[test]
    fn test_twenty_failures_exhaust_budget() {
        let device = legacy_device();
        let program = pattern(192);

        let mut loader = loader(&device);

        struct FailThirdPage(DummyBootloader);
        impl tinyhid_core::TransferProgress for FailThirdPage {
            fn advanced(&mut self, done: usize) {
                if done == 128 {
                    self.0.fail_next_sets(20).unwrap();
                }
            }
        }
        let err = loader
            .write_flash(&program, 192, &mut FailThirdPage(device.clone()))
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolExhausted { offset: 128 }));

        let stats = device.stats().unwrap();
        assert_eq!(stats.opens, stats.closes);
        assert_eq!(&device.flash().unwrap()[..128], &program[..128]);
    }

    #[test]
    fn test_corrupt_read_reported() {
        let device = DummyBootloader::new_default();
        device.corrupt_next_read().unwrap();
        let mut dest = vec![0u8; 128];
        let err = loader(&device)
            .read_flash(&mut dest, 128, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch));
        assert!(err.is_transport());

        let stats = device.stats().unwrap();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.closes, 1);
    }

    #[test]
    fn test_erase_commands() {
        let device = DummyBootloader::with_flash(DummyConfig::default(), &[0u8; 0x2000]);
        device.load_eeprom(&[0x55; 16]).unwrap();

        let mut loader = loader(&device);
        loader.erase_eeprom().unwrap();
        assert!(device.eeprom().unwrap().iter().all(|&b| b == 0xFF));

        loader.erase_flash().unwrap();
        let flash = device.flash().unwrap();
        assert!(flash[..0x1800].iter().all(|&b| b == 0xFF));
        assert!(flash[0x1800..].iter().all(|&b| b == 0));

        loader.leave_bootloader().unwrap();
        assert_eq!(device.stats().unwrap().leaves, 1);
    }

    #[test]
    fn test_bad_report_rejected() {
        let device = DummyBootloader::new_default();
        let mut channel = device.clone().open().unwrap();
        let layout = ReportLayout::CURRENT;

        let mut report = layout.build_command(LoaderCommand::ERASE_EEPROM, &[]);
        report[layout.payload] ^= 0x80;
        assert!(channel.set_feature_report(&report).is_err());

        let mut report = layout.build_command(LoaderCommand::ERASE_EEPROM, &[]);
        report[layout.command] = LoaderCommand::LEAVE_BOOTLOADER.bits();
        assert!(channel.set_feature_report(&report).is_err());

        let legacy = ReportLayout::LEGACY.build_command(LoaderCommand::ERASE_EEPROM, &[]);
        assert!(channel.set_feature_report(&legacy).is_err());

        drop(channel);
        let stats = device.stats().unwrap();
        assert_eq!(stats.reports_rejected, 3);
        assert_eq!(stats.leaves, 0);
    }
}
