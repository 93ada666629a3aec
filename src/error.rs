//! Error kinds for image servicing operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the servicing pipeline and its components.
#[derive(Debug, Error)]
pub enum ServicingError {
    /// The external servicing tool exited non-zero (or could not be waited on).
    #[error("{operation} failed (exit code {exit_code})")]
    ToolInvocationFailure {
        operation: String,
        exit_code: i32,
        /// Raw captured stdout/stderr, kept verbatim for diagnostics.
        output: String,
    },

    /// An expected payload is absent. Usually non-fatal.
    #[error("Resource missing: {what}")]
    ResourceMissing { what: String },

    /// A stale mount directory could not be cleared.
    #[error("Mount directory {} is still in use and could not be cleared", mount_dir.display())]
    MountConflict { mount_dir: PathBuf },

    /// Tool output or a file did not have the expected shape.
    #[error("Could not parse {what}")]
    ParseFailure { what: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ServicingError {
    pub fn tool(operation: impl Into<String>, exit_code: i32, output: impl Into<String>) -> Self {
        Self::ToolInvocationFailure {
            operation: operation.into(),
            exit_code,
            output: output.into(),
        }
    }

    pub fn missing(what: impl Into<String>) -> Self {
        Self::ResourceMissing { what: what.into() }
    }

    pub fn parse(what: impl Into<String>) -> Self {
        Self::ParseFailure { what: what.into() }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for conditions the pipeline downgrades to a warning.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ResourceMissing { .. } | Self::ParseFailure { .. })
    }

    /// Raw tool output, when this error carries any.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::ToolInvocationFailure { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServicingError>;

/// Attach context to `std::io::Result` values.
pub trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| ServicingError::io(f(), e))
    }
}
