//! Carrying a chosen set of Windows editions next to the boot image.
//!
//! The install image is pulled out of the source, filtered down to the
//! selected editions, and written to `<dest>\sources\install.wim` so setup
//! can run from RAM without the original media.

use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveReader;
use crate::common::temp::cleanup_work_dir;
use crate::error::{IoContext, Result, ServicingError};
use crate::image::{get_images, EditionExporter, ImageIndexInfo, ServicingTool};

/// Install images looked for in the source, in order of preference.
pub const INSTALL_IMAGE_ENTRIES: &[&str] = &["sources/install.esd", "sources/install.wim"];

/// Picks which editions to keep when the install image holds several.
pub trait EditionChooser {
    /// Source indices to keep, in destination order. `None` means the
    /// user backed out.
    fn choose(&self, editions: &[ImageIndexInfo]) -> Option<Vec<u32>>;
}

/// Keeps every edition.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllEditions;

impl EditionChooser for AllEditions {
    fn choose(&self, editions: &[ImageIndexInfo]) -> Option<Vec<u32>> {
        Some(editions.iter().map(|e| e.index).collect())
    }
}

/// Always answers with the same indices.
#[derive(Debug, Clone, Default)]
pub struct FixedEditions(pub Vec<u32>);

impl EditionChooser for FixedEditions {
    fn choose(&self, _editions: &[ImageIndexInfo]) -> Option<Vec<u32>> {
        Some(self.0.clone())
    }
}

pub fn install_image_destination(dest_root: &Path) -> PathBuf {
    dest_root.join("sources").join("install.wim")
}

/// First entry of [`INSTALL_IMAGE_ENTRIES`] present in `source`.
pub fn find_install_image(archive: &dyn ArchiveReader, source: &Path) -> Option<&'static str> {
    INSTALL_IMAGE_ENTRIES
        .iter()
        .copied()
        .find(|entry| archive.file_exists(source, entry))
}

/// Decide which editions to export.
///
/// A single edition needs no choice. Otherwise an explicit request wins over
/// the chooser. Every selected index must exist in `editions`.
pub fn resolve_selection(
    editions: &[ImageIndexInfo],
    requested: Option<&[u32]>,
    chooser: &dyn EditionChooser,
) -> Result<Vec<u32>> {
    if editions.is_empty() {
        return Err(ServicingError::parse("editions of the install image"));
    }
    if let [only] = editions {
        return Ok(vec![only.index]);
    }

    let selection = match requested {
        Some(indices) => indices.to_vec(),
        None => chooser.choose(editions).ok_or(ServicingError::Cancelled)?,
    };
    if selection.is_empty() {
        return Err(ServicingError::missing("edition selection"));
    }
    if let Some(unknown) = selection
        .iter()
        .find(|index| !editions.iter().any(|e| e.index == **index))
    {
        return Err(ServicingError::missing(format!("edition {} in the install image", unknown)));
    }
    Ok(selection)
}

pub struct EditionInjector<'a> {
    tool: &'a ServicingTool<'a>,
    archive: &'a dyn ArchiveReader,
    chooser: &'a dyn EditionChooser,
}

/// What an injection produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedEditions {
    pub container: PathBuf,
    pub source_indices: Vec<u32>,
}

impl<'a> EditionInjector<'a> {
    pub fn new(
        tool: &'a ServicingTool<'a>,
        archive: &'a dyn ArchiveReader,
        chooser: &'a dyn EditionChooser,
    ) -> Self {
        Self {
            tool,
            archive,
            chooser,
        }
    }

    /// Export the selected editions of the source's install image to
    /// `<dest_root>\sources\install.wim`.
    ///
    /// Returns `Ok(None)` when the source has no install image. The
    /// extracted copy in `work_dir` is always removed, and so is a partially
    /// written destination.
    pub fn inject(
        &self,
        source: &Path,
        dest_root: &Path,
        work_dir: &Path,
        requested: Option<&[u32]>,
        on_progress: &mut dyn FnMut(u32, &str),
    ) -> Result<Option<InjectedEditions>> {
        let log = self.tool.log();
        let Some(entry) = find_install_image(self.archive, source) else {
            log.line("No Windows install image found, servicing boot.wim only");
            return Ok(None);
        };
        log.line(format!("Windows install image detected: {}", entry));

        let scratch = work_dir.join("install");
        cleanup_work_dir(&scratch);
        let result = self.extract_and_export(entry, source, dest_root, &scratch, requested, on_progress);
        cleanup_work_dir(&scratch);
        result.map(Some)
    }

    fn extract_and_export(
        &self,
        entry: &str,
        source: &Path,
        dest_root: &Path,
        scratch: &Path,
        requested: Option<&[u32]>,
        on_progress: &mut dyn FnMut(u32, &str),
    ) -> Result<InjectedEditions> {
        let log = self.tool.log();
        fs::create_dir_all(scratch).io_context(|| format!("Creating {}", scratch.display()))?;

        let file_name = entry.rsplit('/').next().unwrap_or(entry);
        let extracted = scratch.join(file_name);
        on_progress(0, "Extracting install image");
        self.archive.extract_file(source, entry, &extracted)?;

        let editions = get_images(self.tool, &extracted);
        let selection = resolve_selection(&editions, requested, self.chooser)?;
        for index in &selection {
            let name = editions
                .iter()
                .find(|e| e.index == *index)
                .map(|e| e.name.as_str())
                .unwrap_or_default();
            log.line(format!("Selected edition {}: {}", index, name));
        }

        let destination = install_image_destination(dest_root);
        let exporter = EditionExporter::new(self.tool);
        if let Err(e) = exporter.export(&extracted, &selection, &destination, on_progress) {
            if destination.exists() {
                let _ = fs::remove_file(&destination);
                log.line(format!("Removed partial {}", destination.display()));
            }
            return Err(e);
        }

        Ok(InjectedEditions {
            container: destination,
            source_indices: selection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editions(count: u32) -> Vec<ImageIndexInfo> {
        (1..=count)
            .map(|i| ImageIndexInfo::new(i, format!("Windows 11 Edition {}", i), "", 0))
            .collect()
    }

    struct Declines;

    impl EditionChooser for Declines {
        fn choose(&self, _editions: &[ImageIndexInfo]) -> Option<Vec<u32>> {
            None
        }
    }

    #[test]
    fn test_single_edition_needs_no_choice() {
        let only = vec![ImageIndexInfo::new(4, "Pro", "", 0)];
        assert_eq!(resolve_selection(&only, None, &Declines).unwrap(), vec![4]);
    }

    #[test]
    fn test_request_overrides_chooser() {
        let selection = resolve_selection(&editions(4), Some(&[3, 1]), &Declines).unwrap();
        assert_eq!(selection, vec![3, 1]);
    }

    #[test]
    fn test_chooser_consulted_without_request() {
        assert_eq!(resolve_selection(&editions(3), None, &AllEditions).unwrap(), vec![1, 2, 3]);
        assert_eq!(
            resolve_selection(&editions(3), None, &FixedEditions(vec![2])).unwrap(),
            vec![2]
        );
    }

    #[test]
    fn test_declined_choice_is_cancelled() {
        let err = resolve_selection(&editions(2), None, &Declines).unwrap_err();
        assert!(matches!(err, ServicingError::Cancelled));
    }

    #[test]
    fn test_unknown_or_empty_selection_rejected() {
        assert!(resolve_selection(&editions(2), Some(&[5]), &AllEditions).is_err());
        assert!(resolve_selection(&editions(2), Some(&[]), &AllEditions).is_err());
        assert!(resolve_selection(&[], None, &AllEditions).is_err());
    }
}
