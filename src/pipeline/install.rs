//! Storage drivers for the install image, so setup can see the target disk.

use std::path::{Path, PathBuf};

use crate::drivers::{CategoryFilter, DriverCategory, DriverIntegrator};
use crate::image::{get_images, MountController, ServicingTool};

/// Mount point used while servicing install image indices.
pub const INSTALL_MOUNT_DIR: &str = "temp_install_mount";

/// `install.wim` or `install.esd` already copied under `<dest_root>\sources`.
pub fn find_on_disk_install_image(dest_root: &Path) -> Option<PathBuf> {
    ["install.wim", "install.esd"]
        .iter()
        .map(|name| dest_root.join("sources").join(name))
        .find(|path| path.is_file())
}

/// Outcome of servicing every index of an install image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallServicing {
    pub serviced: Vec<u32>,
    pub warnings: Vec<String>,
}

/// Inject storage drivers into `indices` of `container`, one index at a time.
///
/// Nothing here is fatal: every failure becomes a warning and the index is
/// discarded.
pub fn inject_storage_drivers(
    tool: &ServicingTool<'_>,
    driver_store: &Path,
    work_dir: &Path,
    container: &Path,
    indices: &[u32],
    mount_dir: &Path,
) -> InstallServicing {
    let log = tool.log();
    let controller = MountController::new(tool);
    let mut integrator = DriverIntegrator::new(tool, driver_store, work_dir);
    let mut outcome = InstallServicing::default();
    let mut no_progress = |_: u32, _: &str| {};

    for &index in indices {
        log.line(format!(
            "Injecting storage drivers into {} index {}",
            container.display(),
            index
        ));

        let mut session = match controller.mount(container, mount_dir, index, &mut no_progress) {
            Ok(session) => session,
            Err(e) => {
                outcome
                    .warnings
                    .push(format!("Could not mount install image index {}: {}", index, e));
                continue;
            }
        };

        let injected = integrator.integrate_system(mount_dir, CategoryFilter::Only(DriverCategory::Storage));
        let commit = injected.is_ok();
        if let Err(e) = &injected {
            outcome
                .warnings
                .push(format!("Storage drivers not injected into index {}: {}", index, e));
        }

        match controller.unmount(&mut session, commit, &mut no_progress) {
            Ok(()) if commit => outcome.serviced.push(index),
            Ok(()) => {}
            Err(e) => outcome
                .warnings
                .push(format!("Could not unmount install image index {}: {}", index, e)),
        }
    }

    for warning in &outcome.warnings {
        log.warn(warning);
    }
    outcome
}

/// Service every index the metadata reader reports for `container`.
pub fn inject_storage_drivers_all(
    tool: &ServicingTool<'_>,
    driver_store: &Path,
    work_dir: &Path,
    container: &Path,
    mount_dir: &Path,
) -> InstallServicing {
    let indices: Vec<u32> = get_images(tool, container).iter().map(|i| i.index).collect();
    if indices.is_empty() {
        return InstallServicing {
            serviced: Vec::new(),
            warnings: vec![format!("No indices found in {}", container.display())],
        };
    }
    inject_storage_drivers(tool, driver_store, work_dir, container, &indices, mount_dir)
}
