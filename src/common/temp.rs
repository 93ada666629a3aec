//! Scratch directory handling.

use std::fs;
use std::path::Path;

/// Remove a scratch directory tree. Missing directories are fine.
pub fn cleanup_work_dir(path: &Path) {
    let _ = fs::remove_dir_all(path);
}
