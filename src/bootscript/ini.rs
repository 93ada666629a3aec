//! `.ini` configuration files at the image root.
//!
//! PE builds ship launcher configuration that refers to the boot medium as
//! `Y:`. When booted from RAM everything lives on the target drive instead,
//! so those references are rewritten. Files are handled as bytes since they
//! are rarely UTF-8.

use std::fs;
use std::path::Path;

use crate::archive::{self, ArchiveReader};
use crate::error::{IoContext, Result};
use crate::runlog::RunLog;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const EXT_PROGRAMS_BLOCK: &[u8] = b"_SUB ExtPrograms";
const PROCMON_SAMPLE: &[u8] = b"procmon.exe";

const PROGRAMS_HINT: &[&str] = &[
    "\t// Add EXEC lines here for programs in the Programs folder",
    "\t// Example: EXEC X:\\Programs\\YourProgram.exe",
];

/// Counts from one pass over the configuration files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IniReport {
    /// Files already in the image that were rewritten.
    pub existing: usize,
    /// Files taken from the source archive.
    pub extracted: usize,
}

impl IniReport {
    pub fn total(&self) -> usize {
        self.existing + self.extracted
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn replace_all(content: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    let mut pos = 0;
    while let Some(hit) = find(content, from, pos) {
        out.extend_from_slice(&content[pos..hit]);
        out.extend_from_slice(to);
        pos = hit + from.len();
    }
    out.extend_from_slice(&content[pos.min(content.len())..]);
    out
}

/// `X:` from `X`, `x:`, or `X:\`.
fn drive_prefix(target_drive: &str) -> String {
    let letter = target_drive
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .unwrap_or('X')
        .to_ascii_uppercase();
    format!("{}:", letter)
}

/// Insert the Programs hint after the commented procmon sample line of the
/// `_SUB ExtPrograms` block. Content without that line is returned as is.
fn add_programs_hint(content: Vec<u8>) -> Vec<u8> {
    let Some(block) = find(&content, EXT_PROGRAMS_BLOCK, 0) else {
        return content;
    };

    let mut line_start = match find(&content, b"\n", block) {
        Some(p) => p + 1,
        None => return content,
    };
    while line_start < content.len() {
        let line_end = find(&content, b"\n", line_start).unwrap_or(content.len());
        let line = &content[line_start..line_end];
        let trimmed = line.trim_ascii_start();

        if trimmed.starts_with(b"//") && find(line, PROCMON_SAMPLE, 0).is_some() {
            let eol: &[u8] = if line.ends_with(b"\r") { b"\r\n" } else { b"\n" };
            let first_hint = PROGRAMS_HINT[0].as_bytes();

            let after = (line_end + 1).min(content.len());
            if content[after..].starts_with(first_hint) {
                return content;
            }

            let mut out = Vec::with_capacity(content.len() + 128);
            out.extend_from_slice(&content[..line_end]);
            if line_end == content.len() {
                out.extend_from_slice(eol);
            } else {
                out.push(b'\n');
            }
            for hint in PROGRAMS_HINT {
                out.extend_from_slice(hint.as_bytes());
                out.extend_from_slice(eol);
            }
            out.extend_from_slice(&content[after..]);
            return out;
        }

        if trimmed.starts_with(b"_END") {
            break;
        }
        line_start = line_end + 1;
    }
    content
}

/// Rewrite one configuration file's content.
pub fn rewrite(content: &[u8], target_drive: &str) -> Vec<u8> {
    let body = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let drive = drive_prefix(target_drive);

    let body = replace_all(body, b"Y:\\", format!("{}\\", drive).as_bytes());
    let body = replace_all(&body, b"Y:/", format!("{}/", drive).as_bytes());
    add_programs_hint(body)
}

/// Rewrite the file at `src` into `dest`. Empty or unreadable files are
/// skipped and return false.
pub fn rewrite_file(src: &Path, dest: &Path, target_drive: &str) -> Result<bool> {
    let content = match fs::read(src) {
        Ok(content) if !content.is_empty() => content,
        _ => return Ok(false),
    };
    fs::write(dest, rewrite(&content, target_drive))
        .io_context(|| format!("Writing {}", dest.display()))?;
    Ok(true)
}

/// Rewrite every `*.ini` at the root of `mount_dir` in place.
pub fn reconfigure_existing(mount_dir: &Path, target_drive: &str, log: &RunLog) -> Result<usize> {
    let entries = match fs::read_dir(mount_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };

    let mut count = 0;
    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        let is_ini = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("ini"));
        if !is_ini {
            continue;
        }
        if rewrite_file(&path, &path, target_drive)? {
            log.line(format!(
                "Existing {} in image reconfigured",
                path.file_name().unwrap_or_default().to_string_lossy()
            ));
            count += 1;
        }
    }
    Ok(count)
}

/// Bring every root-level `*.ini` of the source archive into `mount_dir`.
///
/// Each file is rewritten on the way; if that fails the raw file is
/// extracted instead.
pub fn extract_from_archive(
    archive: &dyn ArchiveReader,
    source: &Path,
    mount_dir: &Path,
    work_dir: &Path,
    target_drive: &str,
    log: &RunLog,
) -> usize {
    let files = match archive.list_files(source) {
        Ok(files) => files,
        Err(e) => {
            log.warn(format!("Could not list {}: {}", source.display(), e));
            return 0;
        }
    };
    let ini_files = archive::root_files_with_extension(&files, "ini");
    if ini_files.is_empty() {
        return 0;
    }

    let scratch = tempfile::Builder::new()
        .prefix("ini")
        .tempdir_in(work_dir)
        .ok();

    let mut count = 0;
    for entry in ini_files {
        let dest = mount_dir.join(&entry);

        let processed = scratch.as_ref().is_some_and(|dir| {
            let cached = dir.path().join(&entry);
            archive.extract_file(source, &entry, &cached).is_ok()
                && matches!(rewrite_file(&cached, &dest, target_drive), Ok(true))
        });

        if processed {
            log.line(format!("{} processed and copied to image", entry));
            count += 1;
        } else if archive.extract_file(source, &entry, &dest).is_ok() {
            log.line(format!("{} copied to image unmodified", entry));
            count += 1;
        } else {
            log.warn(format!("Failed to copy {} to image", entry));
        }
    }
    count
}

/// Process configuration files for a mounted image.
pub fn process_config_files(
    mount_dir: &Path,
    archive: &dyn ArchiveReader,
    source: &Path,
    work_dir: &Path,
    target_drive: &str,
    log: &RunLog,
) -> Result<IniReport> {
    let existing = reconfigure_existing(mount_dir, target_drive, log)?;
    fs::create_dir_all(work_dir).io_context(|| format!("Creating {}", work_dir.display()))?;
    let extracted = extract_from_archive(archive, source, mount_dir, work_dir, target_drive, log);

    let report = IniReport { existing, extracted };
    if report.total() > 0 {
        log.line(format!(
            "INI files processed: {} existing reconfigured, {} extracted from source",
            existing, extracted
        ));
    } else {
        log.line("No INI files found to process");
    }
    Ok(report)
}
