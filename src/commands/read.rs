//! Read command implementation

use std::path::Path;

use tinyhid_core::{Error, FeatureTransport, FlashLoader, HexImage};

use crate::cli::DeviceArgs;
use crate::device;
use crate::progress::IndicatifProgress;

/// Attempts before a read that keeps failing in transport is given up
const READ_ATTEMPTS: usize = 3;

/// Run the read command
pub fn run_read(args: &DeviceArgs, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let limit = device::geometry(args)?.application_limit();
    let mut loader = device::open_loader(args)?;

    let data = read_with_retry(&mut loader, limit)?;

    HexImage::from_chunk(0, data).save(output)?;
    println!("Wrote {} bytes to {:?}", limit, output);
    Ok(())
}

/// Read `[0, limit)`, restarting the whole read on transport failures
pub fn read_with_retry<T: FeatureTransport>(
    loader: &mut FlashLoader<T>,
    limit: usize,
) -> Result<Vec<u8>, Error> {
    let mut data = vec![0xFF; limit];
    let mut attempt = 1;
    loop {
        let mut progress = IndicatifProgress::new("Reading");
        match loader.read_flash(&mut data, limit, &mut progress) {
            Ok(_) => {
                progress.finish("Read complete");
                return Ok(data);
            }
            Err(e) if e.is_transport() && attempt < READ_ATTEMPTS => {
                log::warn!("Read attempt {} failed: {}", attempt, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use tinyhid_core::Timing;
    use tinyhid_dummy::{DummyBootloader, DummyConfig};

    #[test]
    fn test_read_retries_after_corrupt_report() {
        let content: Vec<u8> = (0..0x200).map(|i| (i % 251) as u8).collect();
        let device = DummyBootloader::with_flash(DummyConfig::default(), &content);
        device.corrupt_next_read().unwrap();

        let mut loader = FlashLoader::new(device.clone())
            .unwrap()
            .with_timing(Timing::none());
        let data = read_with_retry(&mut loader, 0x200).unwrap();
        assert_eq!(data, content);
        assert_eq!(device.stats().unwrap().opens, 2);
    }

    #[test]
    fn test_read_gives_up_after_attempts() {
        let device = DummyBootloader::new_default();
        for _ in 0..READ_ATTEMPTS {
            device.corrupt_next_read().unwrap();
        }
        let mut loader = FlashLoader::new(device).unwrap();
        assert!(matches!(
            read_with_retry(&mut loader, 64),
            Err(Error::ChecksumMismatch)
        ));
    }
}
