//! Images command - lists the indices of a container.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;
use crate::image::{get_images, select_best_index, ImageContainer, ServicingTool};
use crate::process::SystemRunner;

/// Execute the images command.
pub fn cmd_images(config: &Config, container: &Path, json: bool) -> Result<()> {
    let log = super::open_log(config)?;
    let tool = ServicingTool::new(&SystemRunner, config, &log);
    let listing = ImageContainer::read(&tool, container);

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    if listing.images.is_empty() {
        bail!(
            "No image indices recognized in {}. See {}",
            container.display(),
            config.log_dir.display()
        );
    }

    println!("{}:", container.display());
    for image in &listing.images {
        let marker = if image.is_installer_image { " (setup)" } else { "" };
        println!("  {:>3}  {}{}", image.index, image.name, marker);
        if !image.description.is_empty() && image.description != image.name {
            println!("       {}", image.description);
        }
        if image.size_bytes > 0 {
            println!("       {} bytes", image.size_bytes);
        }
    }
    Ok(())
}

/// Execute the best-index command.
pub fn cmd_best_index(config: &Config, container: &Path) -> Result<()> {
    let log = super::open_log(config)?;
    let tool = ServicingTool::new(&SystemRunner, config, &log);
    let images = get_images(&tool, container);
    println!("{}", select_best_index(&images));
    Ok(())
}
