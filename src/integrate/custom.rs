//! Locating the user's `CustomDrivers` payload.

use std::path::{Path, PathBuf};

use crate::archive::ArchiveReader;
use crate::common::temp::cleanup_work_dir;
use crate::error::{Result, ServicingError};
use crate::runlog::RunLog;

pub const CUSTOM_DRIVERS_DIR: &str = "CustomDrivers";

/// A custom driver tree ready for injection.
#[derive(Debug)]
pub struct CustomDrivers {
    pub path: PathBuf,
    /// Extracted into scratch space; removed when dropped.
    extracted: bool,
}

impl CustomDrivers {
    pub fn is_extracted(&self) -> bool {
        self.extracted
    }
}

impl Drop for CustomDrivers {
    fn drop(&mut self) {
        if self.extracted {
            cleanup_work_dir(&self.path);
        }
    }
}

/// Find custom drivers next to the destination, else in the source image.
///
/// Archive drivers are extracted to `<work_dir>\CustomDrivers`. Absence
/// anywhere is `ResourceMissing`.
pub fn locate(
    destination_root: &Path,
    archive: &dyn ArchiveReader,
    source_image: &Path,
    work_dir: &Path,
    log: &RunLog,
) -> Result<CustomDrivers> {
    let on_disk = destination_root.join(CUSTOM_DRIVERS_DIR);
    if on_disk.is_dir() {
        log.line(format!("Custom drivers found at {}", on_disk.display()));
        return Ok(CustomDrivers {
            path: on_disk,
            extracted: false,
        });
    }

    let scratch = work_dir.join(CUSTOM_DRIVERS_DIR);
    cleanup_work_dir(&scratch);
    match archive.extract_directory(source_image, CUSTOM_DRIVERS_DIR, &scratch) {
        Ok(()) if scratch.is_dir() => {
            log.line("Custom drivers extracted from the source image");
            Ok(CustomDrivers {
                path: scratch,
                extracted: true,
            })
        }
        _ => {
            cleanup_work_dir(&scratch);
            log.line("No custom drivers found");
            Err(ServicingError::missing(CUSTOM_DRIVERS_DIR))
        }
    }
}
