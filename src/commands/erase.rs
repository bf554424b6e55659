//! Erase and leave commands

use crate::cli::{DeviceArgs, EraseTarget};
use crate::device;

/// Run the erase command
pub fn run_erase(args: &DeviceArgs, target: EraseTarget) -> Result<(), Box<dyn std::error::Error>> {
    let mut loader = device::open_loader(args)?;
    match target {
        EraseTarget::Flash => {
            loader.erase_flash()?;
            println!("Flash erased");
        }
        EraseTarget::Eeprom => {
            loader.erase_eeprom()?;
            println!("EEPROM erased");
        }
    }
    Ok(())
}

/// Run the leave command
pub fn run_leave(args: &DeviceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut loader = device::open_loader(args)?;
    loader.leave_bootloader()?;
    println!("Started application");
    Ok(())
}
