//! tinyhid - Flasher for the TinyHID USB bootloader
//!
//! Writes, reads and erases the flash of ATtiny devices running the
//! TinyHID bootloader, which talks to the host through a single HID
//! feature report and needs no driver.
//!
//! # Architecture
//!
//! - `tinyhid-core` implements HEX images, report framing and the flashing
//!   protocol against an abstract feature report transport.
//! - `tinyhid-usb` is that transport over USB HID control requests.
//! - `tinyhid-dummy` is an in-memory bootloader, selected with `--dummy`.

#[cfg(not(any(feature = "usb", feature = "dummy")))]
compile_error!("enable at least one of the `usb` or `dummy` features");

mod cli;
mod commands;
mod device;
mod progress;

use clap::Parser;
use cli::{Cli, Commands, WriteMode};

fn main() {
    let cli = Cli::parse();

    // Initialize logger; -v/-vv override RUST_LOG
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = verbosity_filter(cli.verbose) {
        logger.filter_level(level);
    }
    logger.init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    println!("Success");
}

fn verbosity_filter(verbose: u8) -> Option<log::LevelFilter> {
    match verbose {
        0 => None,
        1 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let args = &cli.device;
    match cli.command {
        Commands::Write { input, mode } => {
            commands::run_write(args, &input, mode != Some(WriteMode::NotLeave))
        }
        Commands::Read { output } => commands::run_read(args, &output),
        Commands::Erase { target } => commands::run_erase(args, target),
        Commands::Leave => commands::run_leave(args),
        Commands::Reload {
            reloader,
            bootloader,
        } => commands::run_reload(args, &reloader, &bootloader),
        Commands::Info => commands::run_info(args),
    }
}
