//! Image container operations, all carried out through the servicing tool.

pub mod dism;
pub mod export;
pub mod info;
pub mod mount;

pub use dism::ServicingTool;
pub use export::EditionExporter;
pub use info::{get_images, select_best_index, select_best_index_for, ImageContainer, ImageIndexInfo};
pub use mount::{MountController, MountSession, MountState};
