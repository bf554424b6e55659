//! CLI command implementations
//!
//! Each command acquires the bootloader through [`crate::device`], runs one
//! flash protocol operation and releases the device again.

mod erase;
mod info;
mod read;
mod reload;
mod write;

pub use erase::{run_erase, run_leave};
pub use info::run_info;
pub use read::run_read;
pub use reload::run_reload;
pub use write::run_write;
