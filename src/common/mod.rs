//! Shared filesystem utilities.

pub mod files;
pub mod temp;

pub use files::{copy_dir_recursive, dir_size};
pub use temp::cleanup_work_dir;
