//! Mount, unmount, and cleanup commands.

use anyhow::Result;
use std::path::Path;

use super::print_progress;
use crate::config::Config;
use crate::image::{select_best_index_for, MountController, ServicingTool};
use crate::process::SystemRunner;

/// Execute the mount command. Without an index, the boot index heuristic
/// picks one.
pub fn cmd_mount(config: &Config, container: &Path, mount_dir: &Path, index: Option<u32>) -> Result<()> {
    let log = super::open_log(config)?;
    let tool = ServicingTool::new(&SystemRunner, config, &log);
    let index = match index {
        Some(index) => index,
        None => select_best_index_for(&tool, container),
    };

    let session = MountController::new(&tool).mount(container, mount_dir, index, &mut print_progress)?;
    println!(
        "Index {} of {} mounted at {}",
        session.index,
        session.container_path.display(),
        session.mount_dir.display()
    );
    Ok(())
}

/// Execute the unmount command.
pub fn cmd_unmount(config: &Config, mount_dir: &Path, commit: bool) -> Result<()> {
    let log = super::open_log(config)?;
    let tool = ServicingTool::new(&SystemRunner, config, &log);
    MountController::new(&tool).unmount_dir(mount_dir, commit, &mut print_progress)?;
    Ok(())
}

/// Execute the cleanup command.
pub fn cmd_cleanup(config: &Config, mount_dir: &Path) -> Result<()> {
    let log = super::open_log(config)?;
    let tool = ServicingTool::new(&SystemRunner, config, &log);
    MountController::new(&tool).cleanup(mount_dir)?;
    println!("{} is clear", mount_dir.display());
    Ok(())
}
