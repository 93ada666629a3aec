//! Invocation seam for the image servicing tool (DISM).
//!
//! Every call is logged verbatim to the run log before it is interpreted:
//! the command line, then the exit code and the raw captured output.
//! Success is decided by the exit code alone.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::{Result, ServicingError};
use crate::process::{ToolInvocation, ToolOutput, ToolRunner, DEFAULT_TIMEOUT};
use crate::runlog::RunLog;

/// Default bounded wait for a single-index export.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Handle to the servicing tool for one run.
pub struct ServicingTool<'a> {
    runner: &'a dyn ToolRunner,
    program: PathBuf,
    timeout: Duration,
    export_timeout: Duration,
    log: &'a RunLog,
}

impl<'a> ServicingTool<'a> {
    pub fn new(runner: &'a dyn ToolRunner, config: &Config, log: &'a RunLog) -> Self {
        Self {
            runner,
            program: config.dism_path.clone(),
            timeout: config.tool_timeout(),
            export_timeout: config.export_timeout(),
            log,
        }
    }

    /// Tool handle with default timeouts.
    pub fn with_program(runner: &'a dyn ToolRunner, program: impl Into<PathBuf>, log: &'a RunLog) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            log,
        }
    }

    pub fn log(&self) -> &'a RunLog {
        self.log
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn export_timeout(&self) -> Duration {
        self.export_timeout
    }

    /// Run the tool and return its output whatever the exit code.
    ///
    /// A process that cannot be started is reported as a
    /// `ToolInvocationFailure` with exit code -1.
    pub fn invoke(
        &self,
        operation: &str,
        args: Vec<String>,
        timeout: Duration,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolOutput> {
        let invocation = ToolInvocation::new(&self.program, args, timeout);
        self.log.line(format!("Running: {}", invocation.command_line()));

        let output = match self.runner.run(&invocation, on_line) {
            Ok(output) => output,
            Err(e) => {
                let text = format!("{:#}", e);
                self.log.error(format!("{} could not be started: {}", operation, text));
                return Err(ServicingError::tool(operation, -1, text));
            }
        };

        self.log.line(format!("Exit code: {}", output.exit_code));
        if !output.output.trim().is_empty() {
            self.log.line(format!("Output:\n{}", output.output));
        }
        Ok(output)
    }

    /// Run the tool; a non-zero exit becomes `ToolInvocationFailure`.
    pub fn run_checked(
        &self,
        operation: &str,
        args: Vec<String>,
        timeout: Duration,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolOutput> {
        let output = self.invoke(operation, args, timeout, on_line)?;
        if !output.success() {
            self.log
                .error(format!("{} failed with exit code {}", operation, output.exit_code));
            return Err(ServicingError::tool(operation, output.exit_code, output.output));
        }
        Ok(output)
    }
}

// =============================================================================
// Argument builders
// =============================================================================

fn path_arg(name: &str, path: &Path) -> String {
    format!("/{}:{}", name, path.display())
}

pub fn get_image_info_args(container: &Path) -> Vec<String> {
    vec!["/Get-ImageInfo".into(), path_arg("ImageFile", container)]
}

pub fn mount_args(container: &Path, index: u32, mount_dir: &Path) -> Vec<String> {
    vec![
        "/Mount-Image".into(),
        path_arg("ImageFile", container),
        format!("/Index:{}", index),
        path_arg("MountDir", mount_dir),
    ]
}

pub fn unmount_args(mount_dir: &Path, commit: bool) -> Vec<String> {
    vec![
        "/Unmount-Image".into(),
        path_arg("MountDir", mount_dir),
        if commit { "/Commit" } else { "/Discard" }.into(),
    ]
}

pub fn cleanup_mountpoints_args() -> Vec<String> {
    vec!["/Cleanup-Mountpoints".into()]
}

pub fn add_driver_args(mount_dir: &Path, driver_dir: &Path, force_unsigned: bool) -> Vec<String> {
    let mut args = vec![
        path_arg("Image", mount_dir),
        "/Add-Driver".into(),
        path_arg("Driver", driver_dir),
        "/Recurse".into(),
    ];
    if force_unsigned {
        args.push("/ForceUnsigned".into());
    }
    args
}

pub fn export_args(source: &Path, source_index: u32, destination: &Path) -> Vec<String> {
    vec![
        "/Export-Image".into(),
        path_arg("SourceImageFile", source),
        format!("/SourceIndex:{}", source_index),
        path_arg("DestinationImageFile", destination),
        "/Compress:max".into(),
        "/CheckIntegrity".into(),
    ]
}
