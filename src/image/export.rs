//! Copy a chosen subset of indices into a new container.
//!
//! Source indices are appended to the destination in caller order, so
//! `source_indices[i]` becomes destination index `i + 1`.

use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use super::dism::{self, ServicingTool};
use crate::error::{IoContext, Result, ServicingError};

/// The tool's progress bar, e.g. `[==========    45.0%               ]`.
fn progress_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"\[[=\s]*(\d{1,3}(?:[.,]\d+)?)%[=\s]*\]").ok())
        .as_ref()
}

/// Percentage shown by a progress bar in `line`, if any.
pub fn parse_progress(line: &str) -> Option<u32> {
    let caps = progress_marker()?.captures(line)?;
    let value: f64 = caps[1].replace(',', ".").parse().ok()?;
    Some(value.clamp(0.0, 100.0) as u32)
}

/// Overall percentage when `done` of `total` indices are finished and the
/// current one is at `percent`.
pub fn overall_progress(done: usize, total: usize, percent: u32) -> u32 {
    if total == 0 {
        return 100;
    }
    let scaled = (done as u64 * 100 + percent.min(100) as u64) / total as u64;
    scaled.min(100) as u32
}

pub struct EditionExporter<'a> {
    tool: &'a ServicingTool<'a>,
}

impl<'a> EditionExporter<'a> {
    pub fn new(tool: &'a ServicingTool<'a>) -> Self {
        Self { tool }
    }

    /// Export `source_indices` from `source` into a fresh `destination`.
    ///
    /// An existing destination is deleted first. On failure the partially
    /// written destination is left for the caller to remove.
    pub fn export(
        &self,
        source: &Path,
        source_indices: &[u32],
        destination: &Path,
        on_progress: &mut dyn FnMut(u32, &str),
    ) -> Result<()> {
        if source_indices.is_empty() {
            return Err(ServicingError::missing("edition selection"));
        }

        if destination.exists() {
            fs::remove_file(destination)
                .io_context(|| format!("Removing existing {}", destination.display()))?;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("Creating {}", parent.display()))?;
        }

        let log = self.tool.log();
        let total = source_indices.len();
        for (i, &source_index) in source_indices.iter().enumerate() {
            let dest_index = i + 1;
            log.line(format!(
                "Exporting index {} as index {} ({}/{})",
                source_index, dest_index, dest_index, total
            ));
            let message = format!("Exporting edition {} ({}/{})", source_index, dest_index, total);
            on_progress(overall_progress(i, total, 0), &message);

            let mut last = 0;
            let mut on_line = |line: &str| {
                if let Some(percent) = parse_progress(line) {
                    if percent != last {
                        last = percent;
                        on_progress(overall_progress(i, total, percent), &message);
                    }
                }
            };

            let result = self.tool.run_checked(
                &format!("Export index {}", source_index),
                dism::export_args(source, source_index, destination),
                self.tool.export_timeout(),
                &mut on_line,
            );

            if let Err(e) = result {
                log.error(format!("Failed to export index {}: {}", source_index, e));
                return Err(e);
            }
        }

        log.line(format!("Exported {} edition(s) to {}", total, destination.display()));
        on_progress(100, "Export complete");
        Ok(())
    }
}
