//! Page-oriented flashing protocol
//!
//! [`FlashLoader`] drives the bootloader over a [`FeatureTransport`]. Every
//! operation opens the transport once and releases it when it returns.
//!
//! # Writing
//!
//! Flash is written one page per report. The first page's command also
//! erases the whole application region and rewinds the device's write
//! cursor; every page carries fill and write bits so the device copies the
//! payload into its page buffer and commits it.
//!
//! Some USB host controllers intermittently drop the full-size feature
//! report. A failed page is retried on this fast path a bounded number of
//! times, then written "by parts": a `SET_ADDRESS` report with the page
//! offset, `page_size / 4` small `FILL_FLASH` reports of 4 bytes each, and a
//! final `WRITE_FLASH` commit. The retry budget is shared by both paths;
//! once it runs out the write fails with the offset of the page.
//!
//! # Reading
//!
//! A read command rewinds the device's read cursor; every following
//! `GET_REPORT` returns the next page. Reports failing checksum
//! verification abort the read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::command::LoaderCommand;
use crate::error::{Error, Result};
use crate::image::ERASED_BYTE;
use crate::report::ReportLayout;
use crate::transport::{FeatureChannel, FeatureTransport};

/// Bytes per `FILL_FLASH` report on the slow write path
pub const FILL_CHUNK: usize = 4;

/// Retry budget for page writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed single-report attempts before falling back to writing by parts
    pub fast_attempts: u32,
    /// Failed attempts (both paths) after which the write is abandoned
    pub total_attempts: u32,
    /// Pause after each failed attempt
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Fast-path attempts before the slow path
    pub const FAST_ATTEMPTS: u32 = 10;
    /// Attempts across both paths before giving up
    pub const TOTAL_ATTEMPTS: u32 = 20;
    /// Pause between attempts
    pub const BACKOFF: Duration = Duration::from_millis(400);
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            fast_attempts: Self::FAST_ATTEMPTS,
            total_attempts: Self::TOTAL_ATTEMPTS,
            backoff: Self::BACKOFF,
        }
    }
}

/// Settle times the device needs after a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// After each `FILL_FLASH` or `SET_ADDRESS` report
    pub fill_settle: Duration,
    /// After a page write
    pub write_settle: Duration,
    /// After any command that erases flash
    pub erase_settle: Duration,
}

impl Timing {
    /// No delays at all, for emulated devices
    pub const fn none() -> Self {
        Self {
            fill_settle: Duration::ZERO,
            write_settle: Duration::ZERO,
            erase_settle: Duration::ZERO,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fill_settle: Duration::from_millis(1),
            write_settle: Duration::from_millis(5),
            erase_settle: Duration::from_millis(300),
        }
    }
}

/// Progress callbacks for long transfers
pub trait TransferProgress {
    /// A transfer of `total` bytes is starting
    fn started(&mut self, _total: usize) {}

    /// `done` bytes have been transferred so far
    fn advanced(&mut self, _done: usize) {}

    /// The page at `offset` is being written by parts
    fn fallback(&mut self, _offset: usize) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl TransferProgress for NoProgress {}

/// State of one read or write pass
struct FlashSession {
    transferred: usize,
    limit: usize,
    page: Vec<u8>,
}

impl FlashSession {
    fn new(limit: usize, page_size: usize) -> Self {
        Self {
            transferred: 0,
            limit,
            page: vec![ERASED_BYTE; page_size],
        }
    }

    fn is_done(&self) -> bool {
        self.transferred >= self.limit
    }
}

/// Bootloader client
pub struct FlashLoader<T: FeatureTransport> {
    transport: T,
    layout: ReportLayout,
    policy: RetryPolicy,
    timing: Timing,
    cancel: Option<Arc<AtomicBool>>,
}

impl<T: FeatureTransport> FlashLoader<T> {
    /// Create a loader, choosing the layout from the device's report size
    pub fn new(transport: T) -> Result<Self> {
        let layout = ReportLayout::for_report_size(transport.report_size())?;
        Ok(Self::with_checked_layout(transport, layout))
    }

    /// Create a loader with an explicit layout
    ///
    /// Fails if the device's report size does not match the layout.
    pub fn with_layout(transport: T, layout: ReportLayout) -> Result<Self> {
        if transport.report_size() != layout.report_size {
            return Err(Error::UnsupportedReportSize(transport.report_size()));
        }
        Ok(Self::with_checked_layout(transport, layout))
    }

    fn with_checked_layout(transport: T, layout: ReportLayout) -> Self {
        log::info!(
            "Using {} report layout ({} bytes)",
            layout.name,
            layout.report_size
        );
        Self {
            transport,
            layout,
            policy: RetryPolicy::default(),
            timing: Timing::default(),
            cancel: None,
        }
    }

    /// Override the retry budget
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the settle times
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Abort long transfers between reports once `flag` becomes true
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// The report layout in use
    pub fn layout(&self) -> &ReportLayout {
        &self.layout
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Give back the underlying transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Erase the whole EEPROM
    pub fn erase_eeprom(&mut self) -> Result<()> {
        log::debug!("Erasing EEPROM");
        self.send_single(LoaderCommand::ERASE_EEPROM)
    }

    /// Erase application flash and rewind the write cursor
    pub fn erase_flash(&mut self) -> Result<()> {
        log::debug!("Erasing flash");
        self.send_single(LoaderCommand::ERASE_FLASH)
    }

    /// Start the application
    pub fn leave_bootloader(&mut self) -> Result<()> {
        log::debug!("Leaving bootloader");
        self.send_single(LoaderCommand::LEAVE_BOOTLOADER)
    }

    /// One signed command, no response, no retry
    fn send_single(&mut self, command: LoaderCommand) -> Result<()> {
        let mut channel = self.transport.open()?;
        let report = self.layout.build_command(command, &[]);
        channel.set_feature_report(&report)
    }

    /// Write `image` to flash, covering `[0, limit)`
    ///
    /// Bytes past the end of `image` are written as erased flash (0xFF).
    /// `limit` is the application limit (bootloader start minus 4); the
    /// tail of the last page beyond it is padded with 0xFF as well.
    /// Returns the number of bytes written.
    pub fn write_flash(
        &mut self,
        image: &[u8],
        limit: usize,
        progress: &mut dyn TransferProgress,
    ) -> Result<usize> {
        if image.len() > limit {
            return Err(Error::ImageTooLarge {
                needed: image.len(),
                available: limit,
            });
        }

        let layout = self.layout;
        let page_size = layout.payload_len;
        let mut channel = self.transport.open()?;
        let mut session = FlashSession::new(limit, page_size);
        progress.started(limit);

        while !session.is_done() {
            self.check_cancelled()?;

            let offset = session.transferred;
            for (i, byte) in session.page.iter_mut().enumerate() {
                let addr = offset + i;
                *byte = if addr < limit {
                    image.get(addr).copied().unwrap_or(ERASED_BYTE)
                } else {
                    ERASED_BYTE
                };
            }

            let mut command = LoaderCommand::FILL_FLASH | LoaderCommand::WRITE_FLASH;
            if offset == 0 {
                command |= LoaderCommand::ERASE_FLASH;
            }

            log::trace!("Writing page at 0x{:04X} ({:?})", offset, command);
            self.write_page(&mut channel, offset, command, &session.page, progress)?;

            session.transferred = (offset + page_size).min(limit);
            progress.advanced(session.transferred);
        }

        Ok(session.transferred)
    }

    fn write_page(
        &self,
        channel: &mut T::Channel,
        offset: usize,
        command: LoaderCommand,
        page: &[u8],
        progress: &mut dyn TransferProgress,
    ) -> Result<()> {
        let report = self.layout.build_command(command, page);
        let mut failures = 0u32;

        while failures < self.policy.fast_attempts {
            match channel.set_feature_report(&report) {
                Ok(()) => {
                    settle(if command.erases() {
                        self.timing.erase_settle
                    } else {
                        self.timing.write_settle
                    });
                    return Ok(());
                }
                Err(e) if e.is_transport() => {
                    failures += 1;
                    log::warn!(
                        "Page 0x{:04X}: attempt {} failed: {}",
                        offset,
                        failures,
                        e
                    );
                    self.give_up_if_exhausted(failures, offset)?;
                    settle(self.policy.backoff);
                }
                Err(e) => return Err(e),
            }
        }

        log::warn!("Page 0x{:04X}: falling back to writing by parts", offset);
        progress.fallback(offset);

        loop {
            self.check_cancelled()?;
            match self.write_page_by_parts(channel, offset, command, page) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transport() => {
                    failures += 1;
                    log::warn!(
                        "Page 0x{:04X}: attempt {} (by parts) failed: {}",
                        offset,
                        failures,
                        e
                    );
                    self.give_up_if_exhausted(failures, offset)?;
                    settle(self.policy.backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn give_up_if_exhausted(&self, failures: u32, offset: usize) -> Result<()> {
        if failures >= self.policy.total_attempts {
            log::error!("Page 0x{:04X}: giving up after {} attempts", offset, failures);
            return Err(Error::ProtocolExhausted { offset });
        }
        Ok(())
    }

    /// Slow path: address, small fills, commit
    fn write_page_by_parts(
        &self,
        channel: &mut T::Channel,
        offset: usize,
        command: LoaderCommand,
        page: &[u8],
    ) -> Result<()> {
        // Keep the erase of the first page
        let address_command = LoaderCommand::SET_ADDRESS | (command & LoaderCommand::ERASE_FLASH);
        let address = (offset as u32).to_le_bytes();
        channel.set_feature_report(&self.layout.build_command(address_command, &address))?;
        settle(if address_command.erases() {
            self.timing.erase_settle
        } else {
            self.timing.fill_settle
        });

        for part in page.chunks(FILL_CHUNK) {
            channel.set_feature_report(&self.layout.build_command(LoaderCommand::FILL_FLASH, part))?;
            settle(self.timing.fill_settle);
        }

        channel.set_feature_report(&self.layout.build_command(LoaderCommand::WRITE_FLASH, &[]))?;
        settle(self.timing.write_settle);
        Ok(())
    }

    /// Read flash `[0, limit)` into `dest`
    ///
    /// Every inbound report is verified; a mismatch aborts the read with
    /// [`Error::ChecksumMismatch`]. Returns the number of bytes read.
    pub fn read_flash(
        &mut self,
        dest: &mut [u8],
        limit: usize,
        progress: &mut dyn TransferProgress,
    ) -> Result<usize> {
        if dest.len() < limit {
            return Err(Error::ImageTooLarge {
                needed: limit,
                available: dest.len(),
            });
        }

        let layout = self.layout;
        let mut channel = self.transport.open()?;
        let mut session = FlashSession::new(limit, layout.payload_len);
        let mut report = layout.empty_report();

        log::debug!("Reading {} bytes of flash", limit);
        channel.set_feature_report(&layout.build_command(LoaderCommand::READ_FLASH, &[]))?;
        progress.started(limit);

        while !session.is_done() {
            self.check_cancelled()?;

            channel.get_feature_report(&mut report)?;
            if !layout.verify(&report) {
                log::warn!("Checksum mismatch in report at 0x{:04X}", session.transferred);
                return Err(Error::ChecksumMismatch);
            }

            session.page.copy_from_slice(layout.payload(&report));
            let count = session.page.len().min(session.limit - session.transferred);
            let start = session.transferred;
            dest[start..start + count].copy_from_slice(&session.page[..count]);
            session.transferred += count;
            progress.advanced(session.transferred);
        }

        Ok(session.transferred)
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every outbound report and fails on demand
    #[derive(Default)]
    struct Log {
        sent: Vec<Vec<u8>>,
        fail_next: usize,
        opens: usize,
        closes: usize,
        inbound: Vec<Vec<u8>>,
    }

    struct RecordingTransport {
        log: Rc<RefCell<Log>>,
        size: usize,
    }

    struct RecordingChannel {
        log: Rc<RefCell<Log>>,
    }

    impl Drop for RecordingChannel {
        fn drop(&mut self) {
            self.log.borrow_mut().closes += 1;
        }
    }

    impl FeatureChannel for RecordingChannel {
        fn set_feature_report(&mut self, report: &[u8]) -> Result<()> {
            let mut log = self.log.borrow_mut();
            if log.fail_next > 0 {
                log.fail_next -= 1;
                return Err(Error::Transport("pipe error".into()));
            }
            log.sent.push(report.to_vec());
            Ok(())
        }

        fn get_feature_report(&mut self, report: &mut [u8]) -> Result<()> {
            let mut log = self.log.borrow_mut();
            if log.inbound.is_empty() {
                return Err(Error::Transport("no data".into()));
            }
            report.copy_from_slice(&log.inbound.remove(0));
            Ok(())
        }
    }

    impl FeatureTransport for RecordingTransport {
        type Channel = RecordingChannel;

        fn open(&mut self) -> Result<RecordingChannel> {
            self.log.borrow_mut().opens += 1;
            Ok(RecordingChannel {
                log: self.log.clone(),
            })
        }

        fn report_size(&self) -> usize {
            self.size
        }
    }

    fn loader(layout: ReportLayout) -> (FlashLoader<RecordingTransport>, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let transport = RecordingTransport {
            log: log.clone(),
            size: layout.report_size,
        };
        let loader = FlashLoader::new(transport)
            .unwrap()
            .with_timing(Timing::none())
            .with_retry_policy(RetryPolicy {
                backoff: Duration::ZERO,
                ..RetryPolicy::default()
            });
        (loader, log)
    }

    fn commands(log: &Log, layout: &ReportLayout) -> Vec<LoaderCommand> {
        log.sent.iter().map(|r| layout.command(r).unwrap()).collect()
    }

    #[test]
    fn test_layout_chosen_from_report_size() {
        let (loader, _) = loader(ReportLayout::CURRENT);
        assert_eq!(loader.layout(), &ReportLayout::CURRENT);

        let log = Rc::new(RefCell::new(Log::default()));
        let transport = RecordingTransport { log, size: 67 };
        assert!(matches!(
            FlashLoader::with_layout(transport, ReportLayout::CURRENT),
            Err(Error::UnsupportedReportSize(67))
        ));
    }

    #[test]
    fn test_single_commands() {
        let (mut loader, log) = loader(ReportLayout::LEGACY);
        loader.erase_flash().unwrap();
        loader.erase_eeprom().unwrap();
        loader.leave_bootloader().unwrap();

        let log = log.borrow();
        assert_eq!(
            commands(&log, &ReportLayout::LEGACY),
            vec![
                LoaderCommand::ERASE_FLASH,
                LoaderCommand::ERASE_EEPROM,
                LoaderCommand::LEAVE_BOOTLOADER
            ]
        );
        assert!(log.sent.iter().all(|r| ReportLayout::LEGACY.verify(r)));
        assert_eq!(log.opens, 3);
        assert_eq!(log.closes, 3);
    }

    #[test]
    fn test_single_command_failure_not_retried() {
        let (mut loader, log) = loader(ReportLayout::LEGACY);
        log.borrow_mut().fail_next = 1;
        assert!(matches!(loader.erase_eeprom(), Err(Error::Transport(_))));
        let log = log.borrow();
        assert!(log.sent.is_empty());
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_write_pages_and_padding() {
        let layout = ReportLayout::CURRENT;
        let (mut loader, log) = loader(layout);
        let image = vec![0x11u8; 100];
        let written = loader.write_flash(&image, 200, &mut NoProgress).unwrap();
        assert_eq!(written, 200);

        let log = log.borrow();
        assert_eq!(log.sent.len(), 4);
        let first = layout.command(&log.sent[0]).unwrap();
        assert!(first.contains(LoaderCommand::ERASE_FLASH | LoaderCommand::WRITE_FLASH));
        for report in &log.sent[1..] {
            assert_eq!(
                layout.command(report).unwrap(),
                LoaderCommand::FILL_FLASH | LoaderCommand::WRITE_FLASH
            );
        }
        assert_eq!(layout.payload(&log.sent[0]), &[0x11; 64][..]);
        let second = layout.payload(&log.sent[1]);
        assert_eq!(&second[..36], &[0x11; 36][..]);
        assert_eq!(&second[36..], &[0xFF; 28][..]);
        assert!(layout.payload(&log.sent[2]).iter().all(|&b| b == 0xFF));
        // 200 = 3 * 64 + 8; last page is erased past the limit too
        assert!(layout.payload(&log.sent[3]).iter().all(|&b| b == 0xFF));
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_write_rejects_oversized_image() {
        let (mut loader, log) = loader(ReportLayout::LEGACY);
        assert!(matches!(
            loader.write_flash(&[0; 65], 64, &mut NoProgress),
            Err(Error::ImageTooLarge { .. })
        ));
        assert_eq!(log.borrow().opens, 0);
    }

    #[test]
    fn test_fast_retry_recovers() {
        let layout = ReportLayout::LEGACY;
        let (mut loader, log) = loader(layout);
        log.borrow_mut().fail_next = 9;
        loader.write_flash(&[0x22; 64], 64, &mut NoProgress).unwrap();
        let log = log.borrow();
        assert_eq!(log.sent.len(), 1);
        assert!(layout.command(&log.sent[0]).unwrap().contains(LoaderCommand::ERASE_FLASH));
    }

    #[test]
    fn test_fallback_writes_by_parts() {
        let layout = ReportLayout::CURRENT;
        let (mut loader, log) = loader(layout);
        log.borrow_mut().fail_next = 15;

        let page: Vec<u8> = (0..64u8).collect();
        let mut image = vec![0xAA; 64];
        image.extend_from_slice(&page);

        struct Fallbacks(Vec<usize>);
        impl TransferProgress for Fallbacks {
            fn fallback(&mut self, offset: usize) {
                self.0.push(offset);
            }
        }
        let mut progress = Fallbacks(Vec::new());
        assert_eq!(loader.write_flash(&image, 128, &mut progress).unwrap(), 128);
        assert_eq!(progress.0, vec![0]);

        let log = log.borrow();
        let cmds = commands(&log, &layout);
        // Page 0 by parts (address + 16 fills + commit), then page 1 fast
        assert_eq!(cmds.len(), 1 + 16 + 1 + 1);
        assert_eq!(cmds[0], LoaderCommand::SET_ADDRESS | LoaderCommand::ERASE_FLASH);
        assert_eq!(&layout.payload(&log.sent[0])[..4], &[0, 0, 0, 0]);
        for (i, report) in log.sent[1..17].iter().enumerate() {
            assert_eq!(layout.command(report).unwrap(), LoaderCommand::FILL_FLASH);
            let payload = layout.payload(report);
            assert_eq!(&payload[..4], &image[i * 4..i * 4 + 4]);
            assert!(payload[4..].iter().all(|&b| b == 0));
        }
        assert_eq!(cmds[17], LoaderCommand::WRITE_FLASH);
        assert_eq!(cmds[18], LoaderCommand::FILL_FLASH | LoaderCommand::WRITE_FLASH);
        assert_eq!(layout.payload(&log.sent[18]), &page[..]);
    }

    #[test]
    fn test_fallback_on_later_page_carries_offset() {
        let layout = ReportLayout::LEGACY;
        let (mut loader, log) = loader(layout);

        // Fail every fast attempt on the second page
        struct FailAfterFirstPage {
            log: Rc<RefCell<Log>>,
            armed: bool,
        }
        impl TransferProgress for FailAfterFirstPage {
            fn advanced(&mut self, done: usize) {
                if !self.armed && done == 64 {
                    self.armed = true;
                    self.log.borrow_mut().fail_next = 10;
                }
            }
        }
        let mut progress = FailAfterFirstPage {
            log: log.clone(),
            armed: false,
        };
        loader.write_flash(&[0x33; 128], 128, &mut progress).unwrap();

        let log = log.borrow();
        let cmds = commands(&log, &layout);
        assert_eq!(cmds.len(), 1 + 1 + 16 + 1);
        assert_eq!(cmds[1], LoaderCommand::SET_ADDRESS);
        assert_eq!(&layout.payload(&log.sent[1])[..4], &64u32.to_le_bytes());
        assert_eq!(cmds[18], LoaderCommand::WRITE_FLASH);
    }

    #[test]
    fn test_retry_budget_exhausted_reports_offset() {
        let (mut loader, log) = loader(ReportLayout::LEGACY);
        log.borrow_mut().fail_next = 20;
        let err = loader.write_flash(&[0; 64], 64, &mut NoProgress).unwrap_err();
        assert!(matches!(err, Error::ProtocolExhausted { offset: 0 }));
        let log = log.borrow();
        assert!(log.sent.is_empty());
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_read_collects_up_to_limit() {
        let layout = ReportLayout::CURRENT;
        let (mut loader, log) = loader(layout);
        for page in 0..2u8 {
            let data = vec![page + 1; 64];
            let report = layout.build_command(LoaderCommand::READ_FLASH, &data);
            log.borrow_mut().inbound.push(report);
        }

        let mut dest = vec![0u8; 100];
        let read = loader.read_flash(&mut dest, 100, &mut NoProgress).unwrap();
        assert_eq!(read, 100);
        assert_eq!(&dest[..64], &[1; 64][..]);
        assert_eq!(&dest[64..], &[2; 36][..]);

        let log = log.borrow();
        assert_eq!(commands(&log, &layout), vec![LoaderCommand::READ_FLASH]);
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_read_checksum_mismatch_is_error() {
        let layout = ReportLayout::LEGACY;
        let (mut loader, log) = loader(layout);
        let mut report = layout.build_command(LoaderCommand::READ_FLASH, &[5; 64]);
        report[layout.payload + 7] ^= 0x10;
        log.borrow_mut().inbound.push(report);

        let mut dest = vec![0u8; 64];
        assert!(matches!(
            loader.read_flash(&mut dest, 64, &mut NoProgress),
            Err(Error::ChecksumMismatch)
        ));
        assert!(dest.iter().all(|&b| b == 0));
        assert_eq!(log.borrow().closes, 1);
    }

    #[test]
    fn test_cancel_between_pages() {
        let (loader, log) = loader(ReportLayout::LEGACY);
        let flag = Arc::new(AtomicBool::new(true));
        let mut loader = loader.with_cancel_flag(flag);
        assert!(matches!(
            loader.write_flash(&[0; 128], 128, &mut NoProgress),
            Err(Error::Cancelled)
        ));
        assert!(log.borrow().sent.is_empty());
    }
}
