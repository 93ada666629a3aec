//! Timestamped, append-only run log.
//!
//! The run log is the post-mortem record of a processing run: every tool
//! command line, its exit code and raw output, and every stage decision.
//! The format is free text. Each line is mirrored to `tracing` at debug level.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File name of the run log inside the log directory.
pub const RUN_LOG_FILENAME: &str = "bootwim.log";

pub struct RunLog {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl RunLog {
    /// Open (or create) `<log_dir>/bootwim.log` in append mode.
    pub fn open(log_dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(RUN_LOG_FILENAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path: Some(path),
            file: Mutex::new(Some(file)),
        })
    }

    /// A log that only mirrors to `tracing`.
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
        }
    }

    /// Location of the log file, if one is open.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one timestamped entry. Multi-line text is written as-is after
    /// the timestamp so tool output stays readable.
    pub fn line(&self, text: impl AsRef<str>) {
        let text = text.as_ref();
        tracing::debug!(target: "bootwim::runlog", "{}", text);

        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if let Some(file) = guard.as_mut() {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            // A failed log write must never fail the run.
            let _ = writeln!(file, "[{}] {}", stamp, text.trim_end());
            let _ = file.flush();
        }
    }

    /// Append a warning entry.
    pub fn warn(&self, text: impl AsRef<str>) {
        self.line(format!("Warning: {}", text.as_ref()))
    }

    /// Append an error entry.
    pub fn error(&self, text: impl AsRef<str>) {
        self.line(format!("Error: {}", text.as_ref()))
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog").field("path", &self.path).finish()
    }
}
