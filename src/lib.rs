//! bootwim library exports.
//!
//! The binary is a thin CLI over these modules; integration tests drive
//! the pipeline through the `ToolRunner` and `ArchiveReader` seams.

pub mod archive;
pub mod bootscript;
pub mod commands;
pub mod common;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod image;
pub mod integrate;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod runlog;
pub mod timing;

pub use error::{Result, ServicingError};
