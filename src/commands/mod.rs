//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `process` - Service a boot image end to end
//! - `images` - List image indices, pick the boot index
//! - `mount` - Mount, unmount, and clean up mount directories
//! - `export` - Export editions to a new container
//! - `drivers` - Classify the local driver store
//! - `preflight` - Run preflight checks
//! - `show` - Display information

pub mod drivers;
pub mod export;
pub mod images;
pub mod mount;
mod preflight;
pub mod process;
pub mod show;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::runlog::RunLog;

pub use drivers::cmd_drivers;
pub use export::cmd_export;
pub use images::{cmd_best_index, cmd_images};
pub use mount::{cmd_cleanup, cmd_mount, cmd_unmount};
pub use preflight::cmd_preflight;
pub use process::cmd_process;
pub use show::cmd_show;

/// Open the run log configured for this machine.
fn open_log(config: &Config) -> Result<RunLog> {
    RunLog::open(&config.log_dir)
        .with_context(|| format!("Failed to open run log in {}", config.log_dir.display()))
}

/// Progress printer shared by the tool-driving commands.
fn print_progress(percent: u32, message: &str) {
    println!("  [{:>3}%] {}", percent, message);
}
