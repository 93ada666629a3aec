//! Centralized command execution.
//!
//! Every external program (DISM, 7z) goes through this module. Commands
//! capture stdout and stderr, run under a bounded wait, and can stream
//! their output line by line while they run (DISM redraws its progress bar
//! with carriage returns, so both `\r` and `\n` end a line). A non-zero exit
//! is reported, never turned into an error: callers decide what it means.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Default bounded wait for an external command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// How long to wait for stderr to close once the process has exited.
const STDERR_GRACE: Duration = Duration::from_secs(5);

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
    /// True if the command was killed after exceeding its timeout.
    pub timed_out: bool,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal or timeout.
    pub fn code(&self) -> i32 {
        if self.timed_out {
            return -1;
        }
        self.status.code().unwrap_or(-1)
    }

    /// Stdout followed by stderr, the way a console would show them.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout.trim_end(), self.stderr)
        }
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Kill the command if it runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        self.run_streaming(&mut |_| {})
    }

    /// Run the command, handing each output line to `on_line` as it arrives.
    ///
    /// Blocks until the process exits or the timeout elapses. A timed-out
    /// process is killed and reported with `timed_out = true`; its stdout is
    /// whatever lines arrived before the kill. Reader threads still blocked on
    /// a pipe inherited by a grandchild are detached, not joined.
    pub fn run_streaming(self, on_line: &mut dyn FnMut(&str)) -> Result<CommandResult> {
        let mut child = self.spawn()?;

        let stdout = child.stdout.take().context("stdout was not captured")?;
        let mut stderr = child.stderr.take().context("stderr was not captured")?;

        let (tx, rx) = mpsc::channel::<String>();
        let stdout_reader = thread::spawn(move || read_lines(stdout, tx));
        let (err_tx, err_rx) = mpsc::channel::<String>();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            let _ = err_tx.send(String::from_utf8_lossy(&buf).into_owned());
        });

        let deadline = Instant::now() + self.timeout;
        let mut received: Vec<String> = Vec::new();
        let mut timed_out = false;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining.max(Duration::from_millis(1))) {
                Ok(line) => {
                    on_line(&line);
                    received.push(line);
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        timed_out = true;
                        let _ = child.kill();
                        break;
                    }
                }
            }
        }

        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        // The channel disconnected, so the stdout reader has already returned.
        let stdout = if timed_out {
            received.join("\n")
        } else {
            stdout_reader.join().unwrap_or_default()
        };
        let stderr = err_rx.recv_timeout(STDERR_GRACE).unwrap_or_default();

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            timed_out,
        })
    }

    fn spawn(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))
    }
}

/// Read `reader` to the end, sending every `\r`- or `\n`-terminated line.
/// Returns everything read.
fn read_lines(mut reader: impl Read, tx: mpsc::Sender<String>) -> String {
    let mut all = Vec::new();
    let mut line = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        all.extend_from_slice(&buf[..n]);
        for &b in &buf[..n] {
            if b == b'\r' || b == b'\n' {
                if !line.is_empty() {
                    let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
                    line.clear();
                }
            } else {
                line.push(b);
            }
        }
    }
    if !line.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
    }

    String::from_utf8_lossy(&all).into_owned()
}

// =============================================================================
// Tool runner seam
// =============================================================================

/// A fully specified external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// The command line as it would be typed, for logs.
    pub fn command_line(&self) -> String {
        let mut line = quote_arg(&self.program.to_string_lossy());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote_arg(arg));
        }
        line
    }

    /// True if any argument equals `flag`, ignoring ASCII case.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a.eq_ignore_ascii_case(flag))
    }

    /// Value of a `/Name:value` argument, matching the name case-insensitively.
    pub fn option_value(&self, name: &str) -> Option<&str> {
        let prefix = format!("/{}:", name.to_ascii_lowercase());
        self.args.iter().find_map(|a| {
            let lower = a.to_ascii_lowercase();
            lower.starts_with(&prefix).then(|| &a[prefix.len()..])
        })
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.contains(' ') {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

/// Exit code plus raw output of a finished tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub output: String,
}

impl ToolOutput {
    /// The exit code is the only success signal.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external tools. Swapped for a scripted runner in tests.
pub trait ToolRunner {
    /// Run `invocation` to completion, streaming output lines to `on_line`.
    ///
    /// Returns `Err` only when the process could not be started at all.
    fn run(&self, invocation: &ToolInvocation, on_line: &mut dyn FnMut(&str)) -> Result<ToolOutput>;
}

/// Runs tools as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &ToolInvocation, on_line: &mut dyn FnMut(&str)) -> Result<ToolOutput> {
        let result = Cmd::new(invocation.program.to_string_lossy())
            .args(&invocation.args)
            .timeout(invocation.timeout)
            .run_streaming(on_line)?;

        let mut output = result.combined_output();
        if result.timed_out {
            output.push_str(&format!("\n[killed after {:?}]", invocation.timeout));
        }

        Ok(ToolOutput {
            exit_code: result.code(),
            output,
        })
    }
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Full path of `program` if it is on PATH.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

// =============================================================================
// Tests
// =============================================================================
