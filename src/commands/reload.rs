//! Bootloader self-update
//!
//! Flashes a reloader application carrying the new bootloader, lets it run,
//! then reconnects to the fresh bootloader and erases the reloader.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tinyhid_core::{build_reload_image, HexImage};

use crate::cli::DeviceArgs;
use crate::device;
use crate::progress::IndicatifProgress;

/// Time the reloader needs to copy the bootloader and re-enumerate
const RELOAD_SETTLE: Duration = Duration::from_secs(5);
/// How long to poll for the new bootloader
const REACQUIRE_TIMEOUT: Duration = Duration::from_secs(40);

/// Run the reload command
pub fn run_reload(
    args: &DeviceArgs,
    reloader: &Path,
    bootloader: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let geometry = device::geometry(args)?;
    let reloader = HexImage::load(reloader)?;
    let bootloader = HexImage::load(bootloader)?;
    let program = build_reload_image(&reloader, &bootloader, &geometry)?;

    let mut loader = device::open_loader(args)?;
    let mut progress = IndicatifProgress::new("Writing reloader");

    println!("Writing new bootloader");
    let start = Instant::now();
    loader.write_flash(&program, geometry.application_limit(), &mut progress)?;
    progress.finish("Write complete");
    println!(
        "Done in {} ms, begin update",
        start.elapsed().as_millis()
    );
    loader.leave_bootloader()?;

    let device = loader.into_transport();
    if !device.is_emulated() {
        thread::sleep(RELOAD_SETTLE);
    }
    let device = device.reacquire(args, REACQUIRE_TIMEOUT)?;
    let mut loader = device::loader(device, args)?;

    println!("Erasing empty space");
    loader.erase_flash()?;
    Ok(())
}
