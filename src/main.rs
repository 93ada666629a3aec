//! bootwim - Windows boot image servicing.
//!
//! Prepares `boot.wim` from a Windows or WinPE source image for RAM boot:
//! - mounts the best boot index with DISM
//! - integrates Programs, custom drivers, and local system drivers
//! - rewrites pecmd.ini or startnet.cmd and the root .ini files
//! - commits, and optionally exports chosen editions of the install image

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use bootwim::commands;
use bootwim::config::Config;
use bootwim::drivers::{CategoryFilter, DriverCategory};
use bootwim::pipeline::RunOptions;

#[derive(Parser)]
#[command(name = "bootwim")]
#[command(about = "Windows boot image servicing")]
#[command(
    after_help = "QUICK START:\n  bootwim preflight                 Check tools and directories\n  bootwim images <boot.wim>         List image indices\n  bootwim process <iso> <dest>      Service boot.wim for RAM boot"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and service boot.wim from a source image
    Process {
        /// ISO file or extracted source directory
        source: PathBuf,
        /// Destination root (receives sources\boot.wim)
        destination: PathBuf,
        /// Only log that boot image processing is disabled
        #[arg(long)]
        no_boot_files: bool,
        /// Programs directory to integrate (default: <destination>\Programs)
        #[arg(long)]
        programs: Option<PathBuf>,
        /// The install image is copied separately; do not export editions
        #[arg(long)]
        copy_install_image: bool,
        /// Inject drivers from the local driver store
        #[arg(long)]
        inject_drivers: bool,
        /// Install image editions to keep, e.g. 6,1 (default: all)
        #[arg(long, value_delimiter = ',')]
        editions: Option<Vec<u32>>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the indices of an image container
    Images {
        container: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Print the index most likely to be the setup environment
    BestIndex { container: PathBuf },

    /// Mount one index of an image container
    Mount {
        container: PathBuf,
        mount_dir: PathBuf,
        /// Index to mount (default: best boot index)
        #[arg(short, long)]
        index: Option<u32>,
    },

    /// Unmount an image, discarding changes unless --commit is given
    Unmount {
        mount_dir: PathBuf,
        #[arg(long)]
        commit: bool,
    },

    /// Clear a stale mount directory
    Cleanup { mount_dir: PathBuf },

    /// Export chosen indices to a new container, in the given order
    Export {
        source: PathBuf,
        destination: PathBuf,
        /// Source indices, e.g. 3,1
        #[arg(short, long, value_delimiter = ',', required = true)]
        index: Vec<u32>,
    },

    /// Classify the packages of the driver store
    Drivers {
        /// Driver store to scan (default: configured DRIVER_STORE)
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "any")]
        category: CategoryArg,
        #[arg(long)]
        json: bool,
    },

    /// Run preflight checks (verify tools and directories before servicing)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    /// Every package, including unclassified ones
    Any,
    Storage,
    Usb,
    Network,
}

impl CategoryArg {
    fn filter(self) -> CategoryFilter {
        match self {
            Self::Any => CategoryFilter::All,
            Self::Storage => CategoryFilter::Only(DriverCategory::Storage),
            Self::Usb => CategoryFilter::Only(DriverCategory::Usb),
            Self::Network => CategoryFilter::Only(DriverCategory::Network),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&std::env::current_dir()?);

    match cli.command {
        Commands::Process {
            source,
            destination,
            no_boot_files,
            programs,
            copy_install_image,
            inject_drivers,
            editions,
            json,
        } => {
            let options = RunOptions {
                extract_boot_files: !no_boot_files,
                integrate_programs_from: programs,
                copy_install_image_separately: copy_install_image,
                inject_local_drivers: inject_drivers,
                editions,
            };
            commands::cmd_process(&config, &source, &destination, &options, json)?;
        }

        Commands::Images { container, json } => {
            commands::cmd_images(&config, &container, json)?;
        }

        Commands::BestIndex { container } => {
            commands::cmd_best_index(&config, &container)?;
        }

        Commands::Mount {
            container,
            mount_dir,
            index,
        } => {
            commands::cmd_mount(&config, &container, &mount_dir, index)?;
        }

        Commands::Unmount { mount_dir, commit } => {
            commands::cmd_unmount(&config, &mount_dir, commit)?;
        }

        Commands::Cleanup { mount_dir } => {
            commands::cmd_cleanup(&config, &mount_dir)?;
        }

        Commands::Export {
            source,
            destination,
            index,
        } => {
            commands::cmd_export(&config, &source, &index, &destination)?;
        }

        Commands::Drivers {
            store,
            category,
            json,
        } => {
            let store = store.unwrap_or_else(|| config.driver_store.clone());
            commands::cmd_drivers(&store, category.filter(), json)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Show { what } => {
            let target = match what {
                ShowTarget::Config { json } => commands::show::ShowTarget::Config { json },
            };
            commands::cmd_show(target, &config)?;
        }
    }

    Ok(())
}
