//! Boot files copied out of the source image before servicing.

use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveReader;
use crate::error::{IoContext, Result, ServicingError};
use crate::events::ByteCounter;
use crate::runlog::RunLog;

pub const BOOT_WIM_ENTRY: &str = "sources/boot.wim";
pub const BOOT_SDI_ENTRY: &str = "boot/boot.sdi";

pub fn boot_wim_path(dest_root: &Path) -> PathBuf {
    dest_root.join("sources").join("boot.wim")
}

pub fn boot_sdi_path(dest_root: &Path) -> PathBuf {
    dest_root.join("boot").join("boot.sdi")
}

/// Where `boot.sdi` came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdiOrigin {
    AlreadyPresent,
    Archive,
    System(PathBuf),
}

/// Extract `sources/boot.wim` into `<dest_root>\sources`, unless it is
/// already there.
pub fn extract_boot_wim(
    archive: &dyn ArchiveReader,
    source: &Path,
    dest_root: &Path,
    counter: &ByteCounter,
    log: &RunLog,
) -> Result<PathBuf> {
    let dest = boot_wim_path(dest_root);
    if dest.is_file() {
        log.line(format!("boot.wim already exists at {}", dest.display()));
        return Ok(dest);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).io_context(|| format!("Creating {}", parent.display()))?;
    }
    if let Err(e) = archive.extract_file(source, BOOT_WIM_ENTRY, &dest) {
        log.error(format!("Failed to extract boot.wim: {}", e));
        return Err(e);
    }

    let size = fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
    counter.add(size);
    log.line(format!("boot.wim extracted to {}", dest.display()));
    Ok(dest)
}

/// Put `boot.sdi` at `<dest_root>\boot\boot.sdi`.
///
/// The archive's copy is preferred. Without one, the first existing
/// `system_candidates` entry is copied. Nothing found is `ResourceMissing`.
pub fn provide_boot_sdi(
    archive: &dyn ArchiveReader,
    source: &Path,
    dest_root: &Path,
    system_candidates: &[PathBuf],
    log: &RunLog,
) -> Result<SdiOrigin> {
    let dest = boot_sdi_path(dest_root);
    if dest.is_file() {
        log.line(format!("boot.sdi already exists at {}", dest.display()));
        return Ok(SdiOrigin::AlreadyPresent);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).io_context(|| format!("Creating {}", parent.display()))?;
    }

    if archive.file_exists(source, BOOT_SDI_ENTRY) {
        archive.extract_file(source, BOOT_SDI_ENTRY, &dest)?;
        log.line(format!("boot.sdi extracted to {}", dest.display()));
        return Ok(SdiOrigin::Archive);
    }

    log.line("boot.sdi not found in the source image, trying the local system");
    for candidate in system_candidates.iter().filter(|c| c.is_file()) {
        match fs::copy(candidate, &dest) {
            Ok(_) => {
                log.line(format!(
                    "boot.sdi copied from {} to {}",
                    candidate.display(),
                    dest.display()
                ));
                return Ok(SdiOrigin::System(candidate.clone()));
            }
            Err(e) => {
                log.warn(format!("Failed to copy boot.sdi from {}: {}", candidate.display(), e));
            }
        }
    }

    log.warn("boot.sdi found neither in the source image nor on this system");
    Err(ServicingError::missing("boot.sdi"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DirectoryArchive;
    use tempfile::TempDir;

    fn iso_with(tmp: &TempDir, files: &[(&str, &str)]) -> PathBuf {
        let iso = tmp.path().join("iso");
        for (path, content) in files {
            let file = iso.join(path);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, content).unwrap();
        }
        iso
    }

    #[test]
    fn test_boot_wim_extracted_and_counted() {
        let tmp = TempDir::new().unwrap();
        let iso = iso_with(&tmp, &[(BOOT_WIM_ENTRY, "wimdata")]);
        let dest = tmp.path().join("dest");
        let counter = ByteCounter::new();

        let path = extract_boot_wim(&DirectoryArchive, &iso, &dest, &counter, &RunLog::disabled()).unwrap();
        assert_eq!(path, boot_wim_path(&dest));
        assert_eq!(fs::read_to_string(&path).unwrap(), "wimdata");
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_existing_boot_wim_kept() {
        let tmp = TempDir::new().unwrap();
        let iso = iso_with(&tmp, &[(BOOT_WIM_ENTRY, "new")]);
        let dest = tmp.path().join("dest");
        fs::create_dir_all(dest.join("sources")).unwrap();
        fs::write(boot_wim_path(&dest), "old").unwrap();

        let counter = ByteCounter::new();
        extract_boot_wim(&DirectoryArchive, &iso, &dest, &counter, &RunLog::disabled()).unwrap();
        assert_eq!(fs::read_to_string(boot_wim_path(&dest)).unwrap(), "old");
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_missing_boot_wim_fails() {
        let tmp = TempDir::new().unwrap();
        let iso = iso_with(&tmp, &[]);
        let result = extract_boot_wim(
            &DirectoryArchive,
            &iso,
            &tmp.path().join("dest"),
            &ByteCounter::new(),
            &RunLog::disabled(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sdi_from_archive() {
        let tmp = TempDir::new().unwrap();
        let iso = iso_with(&tmp, &[(BOOT_SDI_ENTRY, "sdi")]);
        let dest = tmp.path().join("dest");

        let origin = provide_boot_sdi(&DirectoryArchive, &iso, &dest, &[], &RunLog::disabled()).unwrap();
        assert_eq!(origin, SdiOrigin::Archive);
        assert!(boot_sdi_path(&dest).is_file());
    }

    #[test]
    fn test_sdi_system_fallback_uses_first_existing() {
        let tmp = TempDir::new().unwrap();
        let iso = iso_with(&tmp, &[]);
        let pcat = tmp.path().join("Windows/Boot/PCAT/boot.sdi");
        fs::create_dir_all(pcat.parent().unwrap()).unwrap();
        fs::write(&pcat, "pcat").unwrap();
        let candidates = vec![tmp.path().join("Windows/Boot/DVD/EFI/boot.sdi"), pcat.clone()];
        let dest = tmp.path().join("dest");

        let origin = provide_boot_sdi(&DirectoryArchive, &iso, &dest, &candidates, &RunLog::disabled()).unwrap();
        assert_eq!(origin, SdiOrigin::System(pcat));
        assert_eq!(fs::read_to_string(boot_sdi_path(&dest)).unwrap(), "pcat");
    }

    #[test]
    fn test_sdi_nowhere_is_resource_missing() {
        let tmp = TempDir::new().unwrap();
        let iso = iso_with(&tmp, &[]);
        let err = provide_boot_sdi(
            &DirectoryArchive,
            &iso,
            &tmp.path().join("dest"),
            &[tmp.path().join("none.sdi")],
            &RunLog::disabled(),
        )
        .unwrap_err();
        assert!(err.is_recoverable());
    }
}
