//! Info command implementation

use tinyhid_core::FeatureTransport;

use crate::cli::DeviceArgs;
use crate::device;

/// Run the info command
pub fn run_info(args: &DeviceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let geometry = device::geometry(args)?;
    let loader = device::open_loader(args)?;
    let layout = loader.layout();

    println!("Device:            {}", loader.transport().describe());
    println!("Feature report:    {} bytes", loader.transport().report_size());
    println!("Report layout:     {}", layout.name);
    println!("Page size:         {} bytes", geometry.page_size);
    println!("Bootloader start:  0x{:04X}", geometry.bootloader_start);
    println!(
        "Application area:  0x0000..0x{:04X} ({} pages)",
        geometry.application_limit(),
        geometry.application_pages()
    );
    Ok(())
}
