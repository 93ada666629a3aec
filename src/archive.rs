//! Reading files out of the source image.
//!
//! Paths inside an archive are relative, use `/` separators, and are
//! compared case-insensitively (ISO 9660 and UDF images are case-insensitive
//! on Windows).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::files::copy_dir_recursive;
use crate::error::{IoContext, Result, ServicingError};
use crate::process::Cmd;

/// Bounded wait for a single 7z call. boot.wim and install.esd are large.
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Lists and extracts files from a source image.
pub trait ArchiveReader {
    /// Every file (not directory) in `source`.
    fn list_files(&self, source: &Path) -> Result<Vec<String>>;

    fn file_exists(&self, source: &Path, path: &str) -> bool {
        let wanted = normalize_entry(path);
        self.list_files(source)
            .map(|files| files.iter().any(|f| f.eq_ignore_ascii_case(&wanted)))
            .unwrap_or(false)
    }

    /// Extract one file to `dest` (a file path).
    fn extract_file(&self, source: &Path, path: &str, dest: &Path) -> Result<()>;

    /// Extract the tree under `dir` so that its contents land in `dest`.
    fn extract_directory(&self, source: &Path, dir: &str, dest: &Path) -> Result<()>;
}

/// `sources\boot.wim` and `/sources/boot.wim` both become `sources/boot.wim`.
pub fn normalize_entry(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// Files of `files` at the archive root with extension `ext`.
pub fn root_files_with_extension(files: &[String], ext: &str) -> Vec<String> {
    let suffix = format!(".{}", ext.to_ascii_lowercase());
    files
        .iter()
        .filter(|f| !f.contains('/'))
        .filter(|f| f.to_ascii_lowercase().ends_with(&suffix))
        .cloned()
        .collect()
}

// =============================================================================
// 7-Zip
// =============================================================================

/// Reads ISO images through the 7z command-line tool.
#[derive(Debug, Clone)]
pub struct SevenZipArchive {
    program: PathBuf,
}

impl SevenZipArchive {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(self.program.to_string_lossy()).timeout(EXTRACT_TIMEOUT)
    }

    /// Extract `pattern` (with paths) into a scratch dir next to `near`.
    fn extract_to_scratch(&self, source: &Path, pattern: &str, near: &Path) -> Result<tempfile::TempDir> {
        fs::create_dir_all(near).io_context(|| format!("Creating {}", near.display()))?;
        let scratch = tempfile::Builder::new()
            .prefix(".bootwim-7z")
            .tempdir_in(near)
            .io_context(|| format!("Creating scratch directory in {}", near.display()))?;

        let result = self
            .cmd()
            .args(["x", "-y"])
            .arg(format!("-o{}", scratch.path().display()))
            .arg_path(source)
            .arg(pattern)
            .run()
            .map_err(|e| ServicingError::tool("7z extract", -1, format!("{:#}", e)))?;

        if !result.success() {
            return Err(ServicingError::tool(
                format!("7z extract {}", pattern),
                result.code(),
                result.combined_output(),
            ));
        }
        Ok(scratch)
    }
}

impl ArchiveReader for SevenZipArchive {
    fn list_files(&self, source: &Path) -> Result<Vec<String>> {
        let result = self
            .cmd()
            .args(["l", "-slt", "-ba"])
            .arg_path(source)
            .run()
            .map_err(|e| ServicingError::tool("7z list", -1, format!("{:#}", e)))?;

        if !result.success() {
            return Err(ServicingError::tool("7z list", result.code(), result.combined_output()));
        }
        Ok(parse_slt_listing(&result.stdout))
    }

    fn extract_file(&self, source: &Path, path: &str, dest: &Path) -> Result<()> {
        let entry = normalize_entry(path);
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let scratch = self.extract_to_scratch(source, &entry, parent)?;

        let extracted = scratch.path().join(&entry);
        if !extracted.is_file() {
            return Err(ServicingError::missing(format!("{} in {}", entry, source.display())));
        }
        fs::rename(&extracted, dest)
            .io_context(|| format!("Moving {} to {}", entry, dest.display()))?;
        Ok(())
    }

    fn extract_directory(&self, source: &Path, dir: &str, dest: &Path) -> Result<()> {
        let entry = normalize_entry(dir);
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let scratch = self.extract_to_scratch(source, &format!("{}/*", entry), parent)?;

        let extracted = scratch.path().join(&entry);
        if !extracted.is_dir() {
            return Err(ServicingError::missing(format!("{} in {}", entry, source.display())));
        }
        if dest.exists() {
            fs::remove_dir_all(dest).io_context(|| format!("Removing {}", dest.display()))?;
        }
        if fs::rename(&extracted, dest).is_err() {
            copy_dir_recursive(&extracted, dest).map_err(|e| {
                ServicingError::io(
                    format!("Copying {} to {}", entry, dest.display()),
                    std::io::Error::other(format!("{:#}", e)),
                )
            })?;
        }
        Ok(())
    }
}

/// File paths from `7z l -slt -ba` output. Directories are skipped.
pub fn parse_slt_listing(output: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut current: Option<String> = None;
    let mut is_dir = false;

    let mut flush = |path: Option<String>, is_dir: bool| {
        if let Some(path) = path {
            if !is_dir && !path.is_empty() {
                files.push(normalize_entry(&path));
            }
        }
    };

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("Path = ") {
            flush(current.take(), is_dir);
            current = Some(path.trim().to_string());
            is_dir = false;
        } else if let Some(folder) = line.strip_prefix("Folder = ") {
            is_dir = folder.trim() == "+";
        } else if let Some(attrs) = line.strip_prefix("Attributes = ") {
            if attrs.trim_start().starts_with('D') {
                is_dir = true;
            }
        }
    }
    flush(current.take(), is_dir);
    files
}

// =============================================================================
// Plain directory
// =============================================================================

/// Treats a directory (an extracted or mounted image) as the archive root.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryArchive;

impl DirectoryArchive {
    fn resolve(source: &Path, path: &str) -> Option<PathBuf> {
        let mut current = source.to_path_buf();
        for part in normalize_entry(path).split('/').filter(|p| !p.is_empty()) {
            let exact = current.join(part);
            if exact.exists() {
                current = exact;
                continue;
            }
            let found = fs::read_dir(&current)
                .ok()?
                .filter_map(|e| e.ok())
                .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(part))?;
            current = found.path();
        }
        Some(current)
    }
}

impl ArchiveReader for DirectoryArchive {
    fn list_files(&self, source: &Path) -> Result<Vec<String>> {
        if !source.is_dir() {
            return Err(ServicingError::missing(format!("source directory {}", source.display())));
        }
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(source) {
                files.push(normalize_entry(&rel.to_string_lossy()));
            }
        }
        files.sort();
        Ok(files)
    }

    fn file_exists(&self, source: &Path, path: &str) -> bool {
        Self::resolve(source, path).is_some_and(|p| p.is_file())
    }

    fn extract_file(&self, source: &Path, path: &str, dest: &Path) -> Result<()> {
        let src = Self::resolve(source, path)
            .filter(|p| p.is_file())
            .ok_or_else(|| ServicingError::missing(format!("{} in {}", path, source.display())))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).io_context(|| format!("Creating {}", parent.display()))?;
        }
        fs::copy(&src, dest).io_context(|| format!("Copying {} to {}", src.display(), dest.display()))?;
        Ok(())
    }

    fn extract_directory(&self, source: &Path, dir: &str, dest: &Path) -> Result<()> {
        let src = Self::resolve(source, dir)
            .filter(|p| p.is_dir())
            .ok_or_else(|| ServicingError::missing(format!("{} in {}", dir, source.display())))?;
        copy_dir_recursive(&src, dest).map_err(|e| {
            ServicingError::io(
                format!("Copying {} to {}", src.display(), dest.display()),
                std::io::Error::other(format!("{:#}", e)),
            )
        })?;
        Ok(())
    }
}

/// Pick a reader for `source`: directories are read in place, anything
/// else goes through 7z.
pub fn open(source: &Path, seven_zip: &Path) -> Box<dyn ArchiveReader> {
    if source.is_dir() {
        Box::new(DirectoryArchive)
    } else {
        Box::new(SevenZipArchive::new(seven_zip))
    }
}
