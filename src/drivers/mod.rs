//! Driver packages: classification, staging, and injection into a mounted image.

pub mod classify;
pub mod stage;

pub use classify::{classify, CategoryFilter, DriverCategory};
pub use stage::{scan_store, DriverIntegrator, DriverPackage, DriverStats, StagingArea};
