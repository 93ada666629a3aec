//! Export command - copies chosen editions into a new container.

use anyhow::{Context, Result};
use std::path::Path;

use super::print_progress;
use crate::config::Config;
use crate::image::{EditionExporter, ServicingTool};
use crate::process::SystemRunner;

/// Execute the export command.
pub fn cmd_export(config: &Config, source: &Path, indices: &[u32], destination: &Path) -> Result<()> {
    let log = super::open_log(config)?;
    let tool = ServicingTool::new(&SystemRunner, config, &log);

    let result = EditionExporter::new(&tool).export(source, indices, destination, &mut print_progress);
    if result.is_err() && destination.exists() {
        let _ = std::fs::remove_file(destination);
    }
    result.with_context(|| format!("Export to {} failed", destination.display()))?;

    println!(
        "Exported {} edition(s) to {}",
        indices.len(),
        destination.display()
    );
    Ok(())
}
