//! Payload trees copied into the mounted image.

pub mod copy;
pub mod custom;
pub mod programs;

pub use copy::DirCopier;
pub use custom::CustomDrivers;
pub use programs::{ProgramsIntegrator, ProgramsSource};
