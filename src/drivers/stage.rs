//! Stage driver packages from the local driver store and inject them.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::classify::{self, CategoryFilter, DriverCategory};
use crate::common::files::copy_dir_recursive;
use crate::error::{IoContext, Result, ServicingError};
use crate::image::dism::{self, ServicingTool};

/// A driver package directory and the categories it was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverPackage {
    pub source_directory_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub categories: Vec<DriverCategory>,
}

impl DriverPackage {
    pub fn has(&self, category: DriverCategory) -> bool {
        self.categories.contains(&category)
    }

    pub fn matches(&self, filter: CategoryFilter) -> bool {
        self.categories.iter().any(|c| filter.includes(*c))
    }
}

/// Counts of staged packages per category, plus custom driver sets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    pub storage: u32,
    pub usb: u32,
    pub network: u32,
    pub custom: u32,
}

impl DriverStats {
    fn record(&mut self, package: &DriverPackage, filter: CategoryFilter) {
        for category in &package.categories {
            if !filter.includes(*category) {
                continue;
            }
            match category {
                DriverCategory::Storage => self.storage += 1,
                DriverCategory::Usb => self.usb += 1,
                DriverCategory::Network => self.network += 1,
                DriverCategory::Other => {}
            }
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Drivers integrated: storage={}, usb={}, network={}, custom={}",
            self.storage, self.usb, self.network, self.custom
        )
    }
}

/// Classify every package directory in `store`, sorted by name.
pub fn scan_store(store: &Path) -> Result<Vec<DriverPackage>> {
    if !store.is_dir() {
        return Err(ServicingError::missing(format!(
            "driver store {}",
            store.display()
        )));
    }

    let entries = fs::read_dir(store).io_context(|| format!("Reading {}", store.display()))?;
    let mut packages: Vec<DriverPackage> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .map(|path| DriverPackage {
            source_directory_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            categories: classify::classify_dir(&path),
            path,
        })
        .collect();
    packages.sort_by(|a, b| a.source_directory_name.cmp(&b.source_directory_name));
    Ok(packages)
}

/// Copies of the matched packages, removed when dropped or closed.
pub struct StagingArea {
    dir: TempDir,
    pub packages: Vec<DriverPackage>,
}

impl StagingArea {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

pub struct DriverIntegrator<'a> {
    tool: &'a ServicingTool<'a>,
    store: PathBuf,
    work_dir: PathBuf,
    stats: DriverStats,
}

impl<'a> DriverIntegrator<'a> {
    pub fn new(tool: &'a ServicingTool<'a>, store: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            store: store.into(),
            work_dir: work_dir.into(),
            stats: DriverStats::default(),
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// Copy every package matching `filter` into a fresh staging area.
    ///
    /// A package that fails to copy is logged and skipped. Nothing staged
    /// is `ResourceMissing`.
    pub fn stage(&mut self, filter: CategoryFilter) -> Result<StagingArea> {
        let log = self.tool.log();
        let packages = scan_store(&self.store)?;

        fs::create_dir_all(&self.work_dir)
            .io_context(|| format!("Creating {}", self.work_dir.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("drv")
            .tempdir_in(&self.work_dir)
            .io_context(|| "Creating driver staging directory")?;

        let mut staged = Vec::new();
        for package in packages.into_iter().filter(|p| p.matches(filter)) {
            let dest = dir.path().join(&package.source_directory_name);
            if let Err(e) = copy_dir_recursive(&package.path, &dest) {
                log.warn(format!(
                    "Failed to copy driver directory {}: {:#}",
                    package.source_directory_name, e
                ));
                continue;
            }
            let label = package
                .categories
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",");
            log.line(format!(
                "Staged driver directory {} ({})",
                package.source_directory_name, label
            ));
            self.stats.record(&package, filter);
            staged.push(package);
        }

        if staged.is_empty() {
            let _ = dir.close();
            return Err(ServicingError::missing(format!(
                "matching drivers in {}",
                self.store.display()
            )));
        }

        log.line(self.stats.summary());
        Ok(StagingArea {
            dir,
            packages: staged,
        })
    }

    /// Add every driver under `driver_dir` to the image mounted at `mount_dir`.
    ///
    /// A rejected first attempt is retried once with `/ForceUnsigned`.
    pub fn inject(&self, mount_dir: &Path, driver_dir: &Path, label: &str) -> Result<()> {
        let first = self.tool.invoke(
            &format!("Add {}", label),
            dism::add_driver_args(mount_dir, driver_dir, false),
            self.tool.timeout(),
            &mut |_| {},
        )?;
        if first.success() {
            return Ok(());
        }

        self.tool
            .log()
            .line(format!("Retrying {} with /ForceUnsigned", label));
        self.tool
            .run_checked(
                &format!("Add {} (unsigned)", label),
                dism::add_driver_args(mount_dir, driver_dir, true),
                self.tool.timeout(),
                &mut |_| {},
            )
            .map(|_| ())
    }

    /// Stage matching drivers from the store and inject them.
    ///
    /// The staging area is removed afterwards whatever the outcome.
    pub fn integrate_system(&mut self, mount_dir: &Path, filter: CategoryFilter) -> Result<usize> {
        let staging = self.stage(filter)?;
        let count = staging.packages.len();

        let result = self.inject(mount_dir, staging.path(), "system drivers");

        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            self.tool.log().warn(format!(
                "Could not remove staging directory {}: {}",
                staging_path.display(),
                e
            ));
        }

        result.map(|_| count)
    }

    /// Inject a user-supplied driver tree as-is.
    pub fn integrate_custom(&mut self, mount_dir: &Path, source: &Path) -> Result<()> {
        if !source.is_dir() {
            return Err(ServicingError::missing(format!(
                "custom drivers at {}",
                source.display()
            )));
        }
        self.tool
            .log()
            .line(format!("Integrating custom drivers from {}", source.display()));
        self.inject(mount_dir, source, "custom drivers")?;
        self.stats.custom += 1;
        Ok(())
    }
}
