//! Drivers command - classifies the packages of a driver store.

use anyhow::Result;
use std::path::Path;

use crate::drivers::{scan_store, CategoryFilter};

/// Execute the drivers command.
pub fn cmd_drivers(store: &Path, filter: CategoryFilter, json: bool) -> Result<()> {
    let packages: Vec<_> = scan_store(store)?
        .into_iter()
        .filter(|p| filter == CategoryFilter::All || p.matches(filter))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    for package in &packages {
        let categories: Vec<String> = package.categories.iter().map(|c| c.to_string()).collect();
        println!("  {:<48} {}", package.source_directory_name, categories.join(","));
    }
    println!("\n{} package(s) in {}", packages.len(), store.display());
    Ok(())
}
