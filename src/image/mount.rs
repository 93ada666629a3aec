//! Mount lifecycle for one index of one image container.
//!
//! A session moves `Mounting -> Mounted -> Committing|Discarding` and ends
//! `Unmounted` or `Failed`. Whatever the outcome, the mount directory is
//! removed once the session is over.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::dism::{self, ServicingTool};
use crate::error::{IoContext, Result, ServicingError};

/// Progress callback: `(percent, message)`.
pub type MountProgress<'p> = &'p mut dyn FnMut(u32, &str);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Committing,
    Discarding,
    Failed,
}

impl MountState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unmounted | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct MountSession {
    pub container_path: PathBuf,
    pub index: u32,
    pub mount_dir: PathBuf,
    pub state: MountState,
}

impl MountSession {
    pub fn is_mounted(&self) -> bool {
        self.state == MountState::Mounted
    }
}

pub struct MountController<'a> {
    tool: &'a ServicingTool<'a>,
}

impl<'a> MountController<'a> {
    pub fn new(tool: &'a ServicingTool<'a>) -> Self {
        Self { tool }
    }

    /// Clear whatever occupies `mount_dir` so it can be reused.
    ///
    /// Plain removal is tried first. If files are still held by a stale
    /// mount, the tool is asked to discard that mount and to clean up
    /// orphaned mount points before removal is retried.
    pub fn cleanup(&self, mount_dir: &Path) -> Result<()> {
        if !mount_dir.exists() {
            return Ok(());
        }
        if remove_tree(mount_dir).is_ok() {
            return Ok(());
        }

        let log = self.tool.log();
        log.warn(format!(
            "{} is in use, discarding stale mount",
            mount_dir.display()
        ));

        // Both calls are best effort; only the final removal decides.
        let _ = self.tool.invoke(
            "Discard stale mount",
            dism::unmount_args(mount_dir, false),
            self.tool.timeout(),
            &mut |_| {},
        );
        let _ = self.tool.invoke(
            "Cleanup mount points",
            dism::cleanup_mountpoints_args(),
            self.tool.timeout(),
            &mut |_| {},
        );

        let _ = remove_tree(mount_dir);
        if mount_dir.exists() {
            log.error(format!("Could not clear {}", mount_dir.display()));
            return Err(ServicingError::MountConflict {
                mount_dir: mount_dir.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Mount `index` of `container` at `mount_dir`.
    pub fn mount(
        &self,
        container: &Path,
        mount_dir: &Path,
        index: u32,
        on_progress: MountProgress<'_>,
    ) -> Result<MountSession> {
        let mut session = MountSession {
            container_path: container.to_path_buf(),
            index,
            mount_dir: mount_dir.to_path_buf(),
            state: MountState::Mounting,
        };

        on_progress(10, &format!("Mounting image index {}", index));

        if let Err(e) = self.prepare(container, mount_dir) {
            on_progress(0, "Mount failed");
            return Err(e);
        }

        let result = self.tool.run_checked(
            "Mount image",
            dism::mount_args(container, index, mount_dir),
            self.tool.timeout(),
            &mut |_| {},
        );

        match result {
            Ok(_) => {
                session.state = MountState::Mounted;
                on_progress(100, "Image mounted");
                Ok(session)
            }
            Err(e) => {
                session.state = MountState::Failed;
                let _ = remove_tree(mount_dir);
                on_progress(0, "Mount failed");
                Err(e)
            }
        }
    }

    fn prepare(&self, container: &Path, mount_dir: &Path) -> Result<()> {
        self.cleanup(mount_dir)?;
        fs::create_dir_all(mount_dir)
            .io_context(|| format!("Creating mount directory {}", mount_dir.display()))?;
        clear_readonly(container)
    }

    /// Commit or discard `session`, then remove its mount directory.
    pub fn unmount(
        &self,
        session: &mut MountSession,
        commit: bool,
        on_progress: MountProgress<'_>,
    ) -> Result<()> {
        session.state = if commit {
            MountState::Committing
        } else {
            MountState::Discarding
        };
        let result = self.unmount_dir(&session.mount_dir, commit, on_progress);
        session.state = if result.is_ok() {
            MountState::Unmounted
        } else {
            MountState::Failed
        };
        result
    }

    /// Commit or discard the mount at `mount_dir`, then remove the directory.
    pub fn unmount_dir(
        &self,
        mount_dir: &Path,
        commit: bool,
        on_progress: MountProgress<'_>,
    ) -> Result<()> {
        let (operation, start, done) = if commit {
            ("Commit image", "Saving changes to image", "Changes saved")
        } else {
            ("Discard image", "Unmounting image without saving", "Image unmounted")
        };
        on_progress(10, start);

        let result = self.tool.run_checked(
            operation,
            dism::unmount_args(mount_dir, commit),
            self.tool.timeout(),
            &mut |_| {},
        );

        if let Err(e) = remove_tree(mount_dir) {
            if mount_dir.exists() {
                self.tool
                    .log()
                    .warn(format!("Could not remove {}: {}", mount_dir.display(), e));
            }
        }

        match result {
            Ok(_) => {
                on_progress(100, done);
                Ok(())
            }
            Err(e) => {
                on_progress(0, "Unmount failed");
                Err(e)
            }
        }
    }
}

/// Remove a directory tree, clearing read-only flags if the first try fails.
fn remove_tree(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(_) => {
            for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
                let _ = clear_readonly(entry.path());
            }
            fs::remove_dir_all(dir)
        }
    }
}

/// Make `path` writable if it is marked read-only.
pub fn clear_readonly(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).io_context(|| format!("Reading {}", path.display()))?;
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)
            .io_context(|| format!("Clearing read-only on {}", path.display()))?;
    }
    Ok(())
}
