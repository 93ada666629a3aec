//! User programs, copied into `<mount>\Programs`.

use std::fs;
use std::path::{Path, PathBuf};

use super::copy::DirCopier;
use crate::archive::ArchiveReader;
use crate::common::files::dir_size;
use crate::error::{Result, ServicingError};
use crate::events::ByteCounter;
use crate::runlog::RunLog;

/// Directory name of the programs payload, on disk and in the archive.
pub const PROGRAMS_DIR: &str = "Programs";

/// Where the programs came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramsSource {
    Directory(PathBuf),
    Archive,
}

pub struct ProgramsIntegrator<'a> {
    copier: &'a DirCopier<'a>,
    counter: &'a ByteCounter,
    log: &'a RunLog,
}

impl<'a> ProgramsIntegrator<'a> {
    pub fn new(copier: &'a DirCopier<'a>, counter: &'a ByteCounter, log: &'a RunLog) -> Self {
        Self {
            copier,
            counter,
            log,
        }
    }

    /// Copy the first available programs tree into `<mount_dir>\Programs`.
    ///
    /// `candidates` are tried in order, duplicates skipped; then the
    /// archive's `Programs` directory. Nothing found is `ResourceMissing`.
    pub fn integrate(
        &self,
        mount_dir: &Path,
        candidates: &[PathBuf],
        archive: &dyn ArchiveReader,
        source_image: &Path,
    ) -> Result<ProgramsSource> {
        let dest = mount_dir.join(PROGRAMS_DIR);

        let mut tried: Vec<&Path> = Vec::new();
        for candidate in candidates {
            if tried.contains(&candidate.as_path()) {
                continue;
            }
            tried.push(candidate.as_path());
            if !candidate.is_dir() {
                continue;
            }

            match self.copier.copy_tree(candidate, &dest, "Integrating Programs") {
                Ok(bytes) => {
                    self.log.line(format!(
                        "Programs integrated from {} ({} bytes)",
                        candidate.display(),
                        bytes
                    ));
                    return Ok(ProgramsSource::Directory(candidate.clone()));
                }
                Err(ServicingError::Cancelled) => return Err(ServicingError::Cancelled),
                Err(e) => {
                    self.log
                        .warn(format!("Failed to integrate Programs from {}: {}", candidate.display(), e));
                }
            }
        }

        let _ = fs::remove_dir_all(&dest);
        match archive.extract_directory(source_image, PROGRAMS_DIR, &dest) {
            Ok(()) => {
                self.counter.add(dir_size(&dest));
                self.log.line("Programs extracted from the source image");
                Ok(ProgramsSource::Archive)
            }
            Err(e) => {
                self.log
                    .line(format!("Programs directory not found in any source: {}", e));
                Err(ServicingError::missing("Programs directory"))
            }
        }
    }
}
