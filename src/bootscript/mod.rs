//! Startup configuration of the mounted boot image.
//!
//! Two kinds of PE are recognized. A PECMD shell is detected by
//! `pecmd.exe` and `pecmd.ini` in `Windows\System32`; everything else is
//! treated as standard WinPE driven by `startnet.cmd`. Nothing here runs an
//! external process.

pub mod ini;
pub mod pecmd;
pub mod startnet;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::runlog::RunLog;

pub use ini::{process_config_files, IniReport};
pub use startnet::StartnetOutcome;

pub(crate) fn system32(mount_dir: &Path) -> PathBuf {
    mount_dir.join("Windows").join("System32")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootVariant {
    /// PECMD shell (Hiren's BootCD PE and similar).
    Pecmd,
    /// Standard WinPE.
    Standard,
}

impl std::fmt::Display for BootVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pecmd => f.write_str("PECMD PE"),
            Self::Standard => f.write_str("Standard WinPE"),
        }
    }
}

pub fn detect(mount_dir: &Path) -> BootVariant {
    if pecmd::pecmd_exe(mount_dir).exists() && pecmd::pecmd_ini(mount_dir).exists() {
        BootVariant::Pecmd
    } else {
        BootVariant::Standard
    }
}

/// Rewrite the startup script of the image mounted at `mount_dir`.
pub fn configure(mount_dir: &Path, spare_letter: char, log: &RunLog) -> Result<BootVariant> {
    let variant = detect(mount_dir);
    log.line(format!("PE type: {}", variant));

    match variant {
        BootVariant::Pecmd => pecmd::configure(mount_dir, spare_letter, log)?,
        BootVariant::Standard => {
            startnet::configure(mount_dir, log)?;
        }
    }
    Ok(variant)
}
