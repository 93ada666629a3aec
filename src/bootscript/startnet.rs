//! Standard WinPE environments, started by `startnet.cmd`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result};
use crate::runlog::RunLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartnetOutcome {
    /// The image already had a startnet.cmd; it was left alone.
    Preserved,
    /// A startnet.cmd was written.
    Created,
}

pub fn startnet_path(mount_dir: &Path) -> PathBuf {
    super::system32(mount_dir).join("startnet.cmd")
}

/// Partition letters are assigned before `wpeinit` so setup can see the
/// data partition, and again afterwards because `wpeinit` may reshuffle
/// them. Setup is then relaunched from the partition holding the install
/// image.
const STARTNET_LINES: &[&str] = &[
    "@echo off",
    "rem Assign drive letters to the partitions of disk 0",
    "call :assign",
    "",
    "wpeinit",
    "",
    "rem wpeinit can drop assignments; apply them again",
    "call :assign",
    "",
    "rem Find the partition holding the install image and start setup from it",
    "for %%d in (C D E F G H I J K L M N O P Q R S T U V W Y Z) do (",
    "  if exist %%d:\\sources\\install.esd set SETUPDRIVE=%%d",
    "  if exist %%d:\\sources\\install.wim set SETUPDRIVE=%%d",
    ")",
    "if not defined SETUPDRIVE goto :eof",
    "if exist %SETUPDRIVE%:\\setup.exe (",
    "  %SETUPDRIVE%:\\setup.exe",
    ") else (",
    "  %SETUPDRIVE%:\\sources\\setup.exe",
    ")",
    "goto :eof",
    "",
    ":assign",
    "echo rescan > X:\\assign.txt",
    "echo select disk 0 >> X:\\assign.txt",
    "for /L %%i in (1,1,8) do (",
    "  echo select partition %%i >> X:\\assign.txt",
    "  echo assign >> X:\\assign.txt",
    ")",
    "diskpart /s X:\\assign.txt > nul 2>&1",
    "del X:\\assign.txt > nul 2>&1",
    "goto :eof",
];

/// The synthesized `startnet.cmd`, with CRLF line endings.
pub fn script() -> String {
    let mut out = String::new();
    for line in STARTNET_LINES {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

/// Keep an existing `startnet.cmd`, or write one.
pub fn configure(mount_dir: &Path, log: &RunLog) -> Result<StartnetOutcome> {
    let path = startnet_path(mount_dir);
    if path.exists() {
        log.line("startnet.cmd found: preserving without changes");
        return Ok(StartnetOutcome::Preserved);
    }

    let dir = super::system32(mount_dir);
    fs::create_dir_all(&dir).io_context(|| format!("Creating {}", dir.display()))?;
    fs::write(&path, script()).io_context(|| format!("Writing {}", path.display()))?;
    log.line("startnet.cmd not present, created one with partition mounting");
    Ok(StartnetOutcome::Created)
}
