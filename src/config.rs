//! Configuration management for bootwim.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process;

/// Windows directory used when `SystemRoot` is not set.
pub const DEFAULT_SYSTEM_ROOT: &str = "C:\\Windows";

/// bootwim configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Image servicing tool (DISM).
    pub dism_path: PathBuf,
    /// 7-Zip command-line tool used to read the source image.
    pub seven_zip_path: PathBuf,
    /// Local Windows directory (boot.sdi fallback, driver store).
    pub system_root: PathBuf,
    /// Directory whose subdirectories are driver packages.
    pub driver_store: PathBuf,
    /// Scratch space for extracted install images and custom drivers.
    pub work_dir: PathBuf,
    /// Where the run log is written.
    pub log_dir: PathBuf,
    /// Drive letter mapped to the RAM drive root in PECMD environments.
    pub spare_drive_letter: char,
    /// Drive that `Y:` references in .ini files are rewritten to.
    pub ini_target_drive: String,
    /// Bounded wait for mount, unmount, and driver injection.
    pub tool_timeout_secs: u64,
    /// Bounded wait for a single-index export.
    pub export_timeout_secs: u64,
}

impl Config {
    /// Load configuration from .env file and environment.
    ///
    /// `.env` is looked up in `base_dir`.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        if let Ok(iter) = dotenvy::from_path_iter(base_dir.join(".env")) {
            for (key, value) in iter.flatten() {
                env_vars.insert(key, value);
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(&env_vars)
    }

    /// Build a configuration from an explicit variable map.
    pub fn from_vars(env_vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| env_vars.get(key).filter(|v| !v.trim().is_empty()).cloned();

        let system_root = get("SYSTEM_ROOT")
            .or_else(|| get("SystemRoot"))
            .or_else(|| get("SYSTEMROOT"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSTEM_ROOT));

        let dism_path = get("DISM_PATH")
            .map(PathBuf::from)
            .or_else(|| process::which("dism"))
            .unwrap_or_else(|| system_root.join("System32").join("Dism.exe"));

        let seven_zip_path = get("SEVEN_ZIP_PATH")
            .map(PathBuf::from)
            .or_else(|| process::which("7z"))
            .unwrap_or_else(|| PathBuf::from("7z"));

        let driver_store = get("DRIVER_STORE").map(PathBuf::from).unwrap_or_else(|| {
            system_root
                .join("System32")
                .join("DriverStore")
                .join("FileRepository")
        });

        let work_dir = get("BOOTWIM_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("bootwim"));

        let log_dir = get("BOOTWIM_LOG_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("bootwim")
                .join("logs")
        });

        let spare_drive_letter = get("SPARE_DRIVE_LETTER")
            .and_then(|s| s.trim().chars().next())
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or('Y');

        let ini_target_drive = get("INI_TARGET_DRIVE")
            .map(|s| normalize_drive(&s))
            .unwrap_or_else(|| "X:".to_string());

        let tool_timeout_secs = get("TOOL_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(600);

        let export_timeout_secs = get("EXPORT_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(3600);

        Self {
            dism_path,
            seven_zip_path,
            system_root,
            driver_store,
            work_dir,
            log_dir,
            spare_drive_letter,
            ini_target_drive,
            tool_timeout_secs,
            export_timeout_secs,
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    /// Candidate locations of a local boot.sdi, in preference order.
    pub fn boot_sdi_candidates(&self) -> Vec<PathBuf> {
        let boot = self.system_root.join("Boot");
        vec![
            boot.join("DVD").join("EFI").join("boot.sdi"),
            boot.join("PCAT").join("boot.sdi"),
            boot.join("EFI").join("boot.sdi"),
        ]
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  DISM_PATH: {}", self.dism_path.display());
        println!("  SEVEN_ZIP_PATH: {}", self.seven_zip_path.display());
        println!("  SYSTEM_ROOT: {}", self.system_root.display());
        println!("  DRIVER_STORE: {}", self.driver_store.display());
        println!("  BOOTWIM_WORK_DIR: {}", self.work_dir.display());
        println!("  BOOTWIM_LOG_DIR: {}", self.log_dir.display());
        println!("  SPARE_DRIVE_LETTER: {}", self.spare_drive_letter);
        println!("  INI_TARGET_DRIVE: {}", self.ini_target_drive);
        println!("  TOOL_TIMEOUT_SECS: {}", self.tool_timeout_secs);
        println!("  EXPORT_TIMEOUT_SECS: {}", self.export_timeout_secs);
        if self.driver_store.is_dir() {
            println!("  Driver store: FOUND");
        } else {
            println!("  Driver store: NOT FOUND (local driver injection will be skipped)");
        }
    }
}

/// Turn `x`, `X:`, or `X:\` into `X:`.
fn normalize_drive(value: &str) -> String {
    let letter = value
        .trim()
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('X');
    format!("{}:", letter)
}
