//! Write command implementation

use std::path::Path;
use std::time::Instant;

use tinyhid_core::{build_application_image, HexImage};

use crate::cli::DeviceArgs;
use crate::device;
use crate::progress::IndicatifProgress;

/// Run the write command
pub fn run_write(
    args: &DeviceArgs,
    input: &Path,
    leave: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let geometry = device::geometry(args)?;
    let image = HexImage::load(input)?;
    log::info!(
        "Loaded {:?}: 0x{:04X}..0x{:04X} in {} chunk(s)",
        input,
        image.offset(),
        image.end(),
        image.chunks().len()
    );
    let program = build_application_image(&image, &geometry)?;

    let mut loader = device::open_loader(args)?;
    let mut progress = IndicatifProgress::new("Writing");

    let start = Instant::now();
    let written = loader.write_flash(&program, geometry.application_limit(), &mut progress)?;
    progress.finish("Write complete");
    println!(
        "Wrote {} bytes in {} ms",
        written,
        start.elapsed().as_millis()
    );

    if leave {
        loader.leave_bootloader()?;
        println!("Started application");
    }
    Ok(())
}
