//! Process command - services a boot image end to end.

use anyhow::{Context, Result};
use std::path::Path;

use crate::archive;
use crate::config::Config;
use crate::events::ConsoleSink;
use crate::pipeline::{Pipeline, RunOptions};
use crate::process::SystemRunner;
use crate::timing::format_elapsed;

/// Execute the process command.
pub fn cmd_process(
    config: &Config,
    source: &Path,
    destination: &Path,
    options: &RunOptions,
    json: bool,
) -> Result<()> {
    let log = super::open_log(config)?;
    let reader = archive::open(source, &config.seven_zip_path);
    let pipeline = Pipeline::new(config, &SystemRunner, reader.as_ref(), &log).with_sink(&ConsoleSink);

    let report = pipeline
        .process_run(source, destination, options)
        .with_context(|| format!("Processing {} failed", source.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("=== Run complete ===");
    if let Some(index) = report.boot_index {
        println!("  boot.wim index: {}", index);
    }
    if let Some(variant) = &report.boot_variant {
        println!("  PE type: {}", variant);
    }
    if !report.editions.is_empty() {
        let editions: Vec<String> = report.editions.iter().map(|i| i.to_string()).collect();
        println!("  Editions: {}", editions.join(", "));
    }
    println!("  {}", report.driver_stats.summary());
    println!("  Bytes copied: {}", report.bytes_copied);
    for (state, elapsed) in &report.timings {
        println!("  [{}] {}", format_elapsed(*elapsed), state.label());
    }
    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }
    if let Some(path) = log.path() {
        println!("\nRun log: {}", path.display());
    }
    Ok(())
}
