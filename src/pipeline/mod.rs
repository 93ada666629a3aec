//! One servicing run, from source image to committed boot.wim.
//!
//! Stages run strictly in order:
//!
//! ```text
//! ExtractBootFiles -> InjectEdition -> MountImage -> IntegratePrograms
//!   -> IntegrateCustomDrivers -> IntegrateSystemDrivers -> ConfigureBootScript
//!   -> ProcessConfigFiles -> CommitUnmount -> ServiceInstallImage -> Done
//! ```
//!
//! A missing optional payload is a warning. Anything else stops the run,
//! and if boot.wim is mounted at that point it is discarded exactly once.

pub mod boot_files;
pub mod edition;
pub mod install;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::ArchiveReader;
use crate::bootscript::{self, BootVariant};
use crate::common::temp::cleanup_work_dir;
use crate::config::Config;
use crate::drivers::{CategoryFilter, DriverIntegrator, DriverStats};
use crate::error::{IoContext, Result, ServicingError};
use crate::events::{ByteCounter, CancelFlag, EventSink, FallbackLocalizer, Localizer, NullSink, ProgressWindow};
use crate::image::{select_best_index, ImageContainer, MountController, ServicingTool};
use crate::integrate::{custom, programs::PROGRAMS_DIR, DirCopier, ProgramsIntegrator};
use crate::process::ToolRunner;
use crate::runlog::RunLog;
use crate::timing::Timer;

pub use edition::{AllEditions, EditionChooser, EditionInjector, FixedEditions};

/// Mount point of boot.wim, under the destination root.
pub const MOUNT_DIR: &str = "temp_mount";

const EXTRACT_WINDOW: ProgressWindow = ProgressWindow::new(20, 30);
const EDITION_WINDOW: ProgressWindow = ProgressWindow::new(30, 40);
const MOUNT_WINDOW: ProgressWindow = ProgressWindow::new(40, 50);
const COMMIT_WINDOW: ProgressWindow = ProgressWindow::new(60, 100);

/// Caller choices for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Off means the run only logs that boot image processing is disabled.
    pub extract_boot_files: bool,
    pub integrate_programs_from: Option<PathBuf>,
    /// The install image is copied to disk by the caller, so it is not
    /// exported next to boot.wim.
    pub copy_install_image_separately: bool,
    pub inject_local_drivers: bool,
    /// Install image editions to keep. `None` asks the chooser.
    pub editions: Option<Vec<u32>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            extract_boot_files: true,
            integrate_programs_from: None,
            copy_install_image_separately: false,
            inject_local_drivers: false,
            editions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    ExtractBootFiles,
    InjectEdition,
    MountImage,
    IntegratePrograms,
    IntegrateCustomDrivers,
    IntegrateSystemDrivers,
    ConfigureBootScript,
    ProcessConfigFiles,
    CommitUnmount,
    ServiceInstallImage,
    Done,
    Failed,
}

impl PipelineState {
    pub fn label(self) -> &'static str {
        match self {
            Self::ExtractBootFiles => "Extract boot files",
            Self::InjectEdition => "Inject Windows editions",
            Self::MountImage => "Mount boot.wim",
            Self::IntegratePrograms => "Integrate Programs",
            Self::IntegrateCustomDrivers => "Integrate custom drivers",
            Self::IntegrateSystemDrivers => "Integrate system drivers",
            Self::ConfigureBootScript => "Configure boot script",
            Self::ProcessConfigFiles => "Process INI files",
            Self::CommitUnmount => "Commit boot.wim",
            Self::ServiceInstallImage => "Inject drivers into install image",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub final_state: PipelineState,
    pub boot_index: Option<u32>,
    pub boot_variant: Option<String>,
    pub editions: Vec<u32>,
    pub warnings: Vec<String>,
    pub driver_stats: DriverStats,
    pub bytes_copied: u64,
    #[serde(skip)]
    pub timings: Vec<(PipelineState, Duration)>,
}

/// Services boot images. Collaborators are borrowed for the pipeline's
/// lifetime; one pipeline can carry out several runs, one at a time.
pub struct Pipeline<'a> {
    config: &'a Config,
    runner: &'a dyn ToolRunner,
    archive: &'a dyn ArchiveReader,
    log: &'a RunLog,
    sink: &'a dyn EventSink,
    localizer: &'a dyn Localizer,
    chooser: &'a dyn EditionChooser,
    cancel: CancelFlag,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn ToolRunner,
        archive: &'a dyn ArchiveReader,
        log: &'a RunLog,
    ) -> Self {
        Self {
            config,
            runner,
            archive,
            log,
            sink: &NullSink,
            localizer: &FallbackLocalizer,
            chooser: &AllEditions,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_sink(mut self, sink: &'a dyn EventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_localizer(mut self, localizer: &'a dyn Localizer) -> Self {
        self.localizer = localizer;
        self
    }

    pub fn with_chooser(mut self, chooser: &'a dyn EditionChooser) -> Self {
        self.chooser = chooser;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for cancelling a run from elsewhere.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Carry out one run against `source_image`, writing under
    /// `destination_root`.
    pub fn process_run(
        &self,
        source_image: &Path,
        destination_root: &Path,
        options: &RunOptions,
    ) -> Result<RunReport> {
        let tool = ServicingTool::new(self.runner, self.config, self.log);
        let mut run = Run {
            pipeline: self,
            tool: &tool,
            source: source_image,
            dest_root: destination_root,
            options,
            state: PipelineState::ExtractBootFiles,
            counter: ByteCounter::new(),
            warnings: Vec::new(),
            boot_index: None,
            boot_variant: None,
            editions: Vec::new(),
            driver_stats: DriverStats::default(),
            timings: Vec::new(),
        };

        self.log.line(format!(
            "Run started: source={} destination={}",
            source_image.display(),
            destination_root.display()
        ));

        match run.execute() {
            Ok(()) => {
                run.state = PipelineState::Done;
                self.log.line(format!(
                    "Run finished with {} warning(s), {} bytes copied",
                    run.warnings.len(),
                    run.counter.get()
                ));
                Ok(run.into_report())
            }
            Err(e) => {
                let failed_in = run.state;
                run.state = PipelineState::Failed;
                self.log
                    .error(format!("Run failed during '{}': {}", failed_in.label(), e));
                if let Some(output) = e.tool_output() {
                    self.log.error(format!("Tool output:\n{}", output));
                }
                self.report_failure(&e);
                Err(e)
            }
        }
    }

    fn report_failure(&self, error: &ServicingError) {
        let mut message = self
            .localizer
            .text("run.failed", "Boot image processing failed: {error}")
            .replace("{error}", &error.to_string());
        if let Some(path) = self.log.path() {
            let details = self
                .localizer
                .text("run.see_log", "Details: {log}")
                .replace("{log}", &path.display().to_string());
            message.push('\n');
            message.push_str(&details);
        }
        self.sink.notify_log_update(&message);
    }
}

/// Mutable state of one run.
struct Run<'r> {
    pipeline: &'r Pipeline<'r>,
    tool: &'r ServicingTool<'r>,
    source: &'r Path,
    dest_root: &'r Path,
    options: &'r RunOptions,
    state: PipelineState,
    counter: ByteCounter,
    warnings: Vec<String>,
    boot_index: Option<u32>,
    boot_variant: Option<BootVariant>,
    editions: Vec<u32>,
    driver_stats: DriverStats,
    timings: Vec<(PipelineState, Duration)>,
}

impl<'r> Run<'r> {
    fn config(&self) -> &'r Config {
        self.pipeline.config
    }

    fn log(&self) -> &'r RunLog {
        self.pipeline.log
    }

    fn sink(&self) -> &'r dyn EventSink {
        self.pipeline.sink
    }

    fn say(&self, key: &str, fallback: &str) {
        let text = self.pipeline.localizer.text(key, fallback);
        self.sink().notify_log_update(&text);
    }

    fn progress(&self, percent: u64, label: &str) {
        self.sink().notify_detailed_progress(percent, 100, label);
    }

    fn into_report(self) -> RunReport {
        RunReport {
            final_state: self.state,
            boot_index: self.boot_index,
            boot_variant: self.boot_variant.map(|v| v.to_string()),
            editions: self.editions,
            warnings: self.warnings,
            driver_stats: self.driver_stats,
            bytes_copied: self.counter.get(),
            timings: self.timings,
        }
    }

    /// Move to `state`, unless the run has been cancelled.
    fn enter(&mut self, state: PipelineState) -> Result<()> {
        if self.pipeline.cancel.is_cancelled() {
            self.log().warn(format!("Cancelled before '{}'", state.label()));
            return Err(ServicingError::Cancelled);
        }
        self.state = state;
        self.log().line(format!("== {} ==", state.label()));
        Ok(())
    }

    /// Run one stage, recording how long it took.
    fn stage<T>(&mut self, state: PipelineState, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.enter(state)?;
        let timer = Timer::start(state.label());
        let result = f(self);
        self.timings.push((state, timer.finish()));
        result
    }

    /// Downgrade a recoverable failure to a warning.
    fn tolerate<T>(&mut self, result: Result<T>, what: &str) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_recoverable() => {
                let warning = format!("{}: {}", what, e);
                self.log().warn(&warning);
                self.warnings.push(warning);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn execute(&mut self) -> Result<()> {
        if !self.options.extract_boot_files {
            self.log().line("Boot image processing disabled, nothing to do");
            return Ok(());
        }

        self.progress(20, "Preparing boot files from the source image");
        self.say("boot.prepare", "Preparing boot files from the source image...");
        let boot_wim = self.stage(PipelineState::ExtractBootFiles, Self::extract_boot_files)?;

        if self.options.copy_install_image_separately {
            self.log()
                .line("Skipping install image injection, the on-disk install image will be used");
        } else {
            self.stage(PipelineState::InjectEdition, Self::inject_edition)?;
        }

        self.service_boot_image(&boot_wim)?;

        if self.options.copy_install_image_separately && self.options.inject_local_drivers {
            self.stage(PipelineState::ServiceInstallImage, Self::service_install_image)?;
        }
        Ok(())
    }

    fn extract_boot_files(&mut self) -> Result<PathBuf> {
        let log = self.log();
        self.progress(EXTRACT_WINDOW.map(0), "Extracting boot.wim");
        let boot_wim = boot_files::extract_boot_wim(
            self.pipeline.archive,
            self.source,
            self.dest_root,
            &self.counter,
            log,
        )?;
        self.say("boot.wim_copied", "boot.wim copied.");

        self.progress(EXTRACT_WINDOW.map(50), "Copying boot.sdi");
        let sdi = boot_files::provide_boot_sdi(
            self.pipeline.archive,
            self.source,
            self.dest_root,
            &self.config().boot_sdi_candidates(),
            log,
        );
        if let Some(boot_files::SdiOrigin::System(_)) = self.tolerate(sdi, "boot.sdi")? {
            self.say(
                "boot.sdi_from_system",
                "boot.sdi was not in the source image; copied it from this system.",
            );
        }
        self.progress(EXTRACT_WINDOW.map(100), "Boot files ready");
        Ok(boot_wim)
    }

    fn inject_edition(&mut self) -> Result<()> {
        let work_dir = self.config().work_dir.clone();
        let injector = EditionInjector::new(self.tool, self.pipeline.archive, self.pipeline.chooser);
        let sink = self.sink();
        let mut on_progress = |percent: u32, message: &str| {
            sink.notify_detailed_progress(EDITION_WINDOW.map(percent as u64), 100, message);
        };

        let injected = injector.inject(
            self.source,
            self.dest_root,
            &work_dir,
            self.options.editions.as_deref(),
            &mut on_progress,
        )?;
        let Some(injected) = injected else {
            return Ok(());
        };
        self.editions = injected.source_indices.clone();
        self.say("edition.exported", "Selected Windows editions exported.");

        if self.options.inject_local_drivers {
            let outcome = install::inject_storage_drivers(
                self.tool,
                &self.config().driver_store,
                &work_dir,
                &injected.container,
                &[1],
                &self.dest_root.join(install::INSTALL_MOUNT_DIR),
            );
            self.warnings.extend(outcome.warnings);
        }
        Ok(())
    }

    fn service_boot_image(&mut self, boot_wim: &Path) -> Result<()> {
        let mount_dir = self.dest_root.join(MOUNT_DIR);
        let controller = MountController::new(self.tool);

        let mut session = self.stage(PipelineState::MountImage, |run| {
            controller.cleanup(&mount_dir)?;

            let container = ImageContainer::read(run.tool, boot_wim);
            let index = select_best_index(&container.images);
            let name = container
                .get(index)
                .map(|i| i.name.clone())
                .unwrap_or_default();
            run.boot_index = Some(index);
            run.log()
                .line(format!("Using boot.wim index {} ({})", index, name));
            let announce = run
                .pipeline
                .localizer
                .text("boot.index_selected", "Using boot.wim index {index}: {name}")
                .replace("{index}", &index.to_string())
                .replace("{name}", &name);
            run.sink().notify_log_update(&announce);

            let sink = run.sink();
            let mut on_progress = |percent: u32, message: &str| {
                sink.notify_detailed_progress(MOUNT_WINDOW.map(percent as u64), 100, message);
            };
            controller.mount(boot_wim, &mount_dir, index, &mut on_progress)
        })?;

        let serviced = self.service_mounted(&mount_dir).and_then(|()| {
            self.stage(PipelineState::CommitUnmount, |run| {
                let sink = run.sink();
                let mut on_progress = |percent: u32, message: &str| {
                    sink.notify_detailed_progress(COMMIT_WINDOW.map(percent as u64), 100, message);
                };
                controller.unmount(&mut session, true, &mut on_progress)
            })
        });

        if let Err(e) = serviced {
            self.log()
                .warn(format!("Discarding {} after failure", mount_dir.display()));
            if let Err(discard) = controller.unmount_dir(&mount_dir, false, &mut |_: u32, _: &str| {}) {
                self.log().error(format!("Discard failed: {}", discard));
            }
            return Err(e);
        }
        self.say("boot.committed", "boot.wim saved.");
        Ok(())
    }

    fn service_mounted(&mut self, mount_dir: &Path) -> Result<()> {
        let config = self.config();
        let mut drivers = DriverIntegrator::new(self.tool, &config.driver_store, &config.work_dir);

        self.stage(PipelineState::IntegratePrograms, |run| {
            run.integrate_programs(mount_dir)
        })?;

        self.stage(PipelineState::IntegrateCustomDrivers, |run| {
            let found = custom::locate(
                run.dest_root,
                run.pipeline.archive,
                run.source,
                &config.work_dir,
                run.log(),
            );
            if let Some(found) = run.tolerate(found, "Custom drivers")? {
                drivers.integrate_custom(mount_dir, &found.path)?;
                run.say("drivers.custom", "Custom drivers integrated.");
            }
            Ok(())
        })?;

        self.stage(PipelineState::IntegrateSystemDrivers, |run| {
            if !run.options.inject_local_drivers {
                run.log().line("Local driver injection disabled");
                return Ok(());
            }
            let injected = drivers.integrate_system(mount_dir, CategoryFilter::All);
            if let Some(count) = run.tolerate(injected, "System drivers")? {
                run.log()
                    .line(format!("{} driver package(s) injected from the local system", count));
            }
            Ok(())
        })?;
        self.driver_stats = drivers.stats();
        self.sink().notify_log_update(&self.driver_stats.summary());

        self.stage(PipelineState::ConfigureBootScript, |run| {
            let variant = bootscript::configure(mount_dir, config.spare_drive_letter, run.log())?;
            run.boot_variant = Some(variant);
            Ok(())
        })?;

        self.stage(PipelineState::ProcessConfigFiles, |run| {
            let report = bootscript::process_config_files(
                mount_dir,
                run.pipeline.archive,
                run.source,
                &config.work_dir,
                &config.ini_target_drive,
                run.log(),
            );
            run.tolerate(report, "INI files")?;
            Ok(())
        })
    }

    fn integrate_programs(&mut self, mount_dir: &Path) -> Result<()> {
        let mut candidates = Vec::new();
        if let Some(from) = &self.options.integrate_programs_from {
            candidates.push(from.clone());
        }
        candidates.push(self.dest_root.join(PROGRAMS_DIR));

        let copier = DirCopier::new(&self.counter, &self.pipeline.cancel, self.sink());
        let integrator = ProgramsIntegrator::new(&copier, &self.counter, self.log());
        let result = integrator.integrate(mount_dir, &candidates, self.pipeline.archive, self.source);
        self.sink().notify_detailed_progress(0, 0, "");

        if self.tolerate(result, "Programs")?.is_some() {
            self.say("programs.integrated", "Programs integrated into boot.wim.");
        }
        Ok(())
    }

    fn service_install_image(&mut self) -> Result<()> {
        let Some(container) = install::find_on_disk_install_image(self.dest_root) else {
            self.log().line("No install image on disk, skipping driver injection");
            return Ok(());
        };
        self.say(
            "install.drivers",
            "Injecting storage drivers into the install image...",
        );

        let config = self.config();
        let scratch = config.work_dir.join("install-drivers");
        std::fs::create_dir_all(&scratch).io_context(|| format!("Creating {}", scratch.display()))?;
        let outcome = install::inject_storage_drivers_all(
            self.tool,
            &config.driver_store,
            &scratch,
            &container,
            &self.dest_root.join(install::INSTALL_MOUNT_DIR),
        );
        cleanup_work_dir(&scratch);
        self.warnings.extend(outcome.warnings);
        Ok(())
    }
}
