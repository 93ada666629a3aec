//! Shared test utilities for bootwim tests.
//!
//! Image containers are plain text files here: one line per index,
//! `name|description|size`. `MockRunner` plays DISM against that format.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use bootwim::config::Config;
use bootwim::events::EventSink;
use bootwim::process::{ToolInvocation, ToolOutput, ToolRunner};

/// Test environment with a source image directory, a destination root,
/// and scratch, log, and driver store directories.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Extracted source image, read through `DirectoryArchive`
    pub source: PathBuf,
    /// Destination root (receives sources\boot.wim)
    pub dest: PathBuf,
    pub work: PathBuf,
    pub logs: PathBuf,
    pub store: PathBuf,
    /// Stand-in for the local Windows directory
    pub system_root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let env = Self {
            source: base.join("iso"),
            dest: base.join("dest"),
            work: base.join("work"),
            logs: base.join("logs"),
            store: base.join("DriverStore"),
            system_root: base.join("Windows"),
            _temp_dir: temp_dir,
        };
        for dir in [&env.source, &env.dest, &env.work, &env.logs, &env.system_root] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }
        env
    }

    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    pub fn config(&self) -> Config {
        let vars: HashMap<String, String> = [
            ("DISM_PATH", "dism.exe".into()),
            ("SEVEN_ZIP_PATH", "7z".into()),
            ("SYSTEM_ROOT", self.system_root.display().to_string()),
            ("DRIVER_STORE", self.store.display().to_string()),
            ("BOOTWIM_WORK_DIR", self.work.display().to_string()),
            ("BOOTWIM_LOG_DIR", self.logs.display().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Config::from_vars(&vars)
    }

    /// Write a file under the source image.
    pub fn source_file(&self, rel: &str, content: &str) -> PathBuf {
        write_file(&self.source.join(rel), content)
    }

    /// Put a boot.wim container into the source image.
    pub fn source_boot_wim(&self, images: &[(&str, &str)]) -> PathBuf {
        let path = self.source.join("sources/boot.wim");
        write_container(&path, images);
        path
    }

    /// Add a driver package directory to the driver store.
    pub fn store_package(&self, name: &str, inf: &str) -> PathBuf {
        let dir = self.store.join(name);
        write_file(&dir.join(format!("{}.inf", name)), inf);
        write_file(&dir.join(format!("{}.sys", name)), "sys");
        dir
    }
}

pub fn write_file(path: &Path, content: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
    path.to_path_buf()
}

/// Write a container holding one index per `(name, description)` pair.
pub fn write_container(path: &Path, images: &[(&str, &str)]) {
    let body: String = images
        .iter()
        .enumerate()
        .map(|(i, (name, description))| format!("{}|{}|{}\n", name, description, 400_000_000 + i as u64))
        .collect();
    write_file(path, &body);
}

/// `(name, description, size)` per index of a container written by
/// [`write_container`] or by the mock's export.
pub fn read_container(path: &Path) -> Vec<(String, String, u64)> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut parts = line.split('|');
            let name = parts.next().unwrap_or_default().to_string();
            let description = parts.next().unwrap_or_default().to_string();
            let size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            (name, description, size)
        })
        .collect()
}

/// Relative paths of every file under `dir`, `/`-separated and sorted.
pub fn list_tree(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

// =============================================================================
// Mock servicing tool
// =============================================================================

/// What a successful mount leaves in the mount directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountedTree {
    /// Plain WinPE without a startup script.
    StandardPe,
    /// PECMD shell with a readable pecmd.ini.
    Pecmd,
    /// PECMD markers present, but pecmd.ini cannot be read as a file.
    BrokenPecmd,
}

/// Contents of the mount directory when an unmount was requested.
#[derive(Debug, Clone)]
pub struct UnmountSnapshot {
    pub commit: bool,
    pub files: Vec<String>,
    pub pecmd_ini: Option<String>,
}

/// Plays DISM against text-file containers and records every call.
pub struct MockRunner {
    pub calls: RefCell<Vec<ToolInvocation>>,
    pub snapshots: RefCell<Vec<UnmountSnapshot>>,
    tree: Cell<MountedTree>,
    /// Arguments that make a call fail when present.
    failing_args: RefCell<Vec<String>>,
    /// Reject driver injection unless `/ForceUnsigned` is given.
    require_unsigned: Cell<bool>,
}

pub const PECMD_INI: &str = "{ENTER:SHELL}\r\nEXEC X:\\Windows\\System32\\wallpaper.exe\r\n";

impl MockRunner {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            snapshots: RefCell::new(Vec::new()),
            tree: Cell::new(MountedTree::StandardPe),
            failing_args: RefCell::new(Vec::new()),
            require_unsigned: Cell::new(false),
        }
    }

    pub fn with_tree(self, tree: MountedTree) -> Self {
        self.tree.set(tree);
        self
    }

    pub fn fail_on(self, arg: &str) -> Self {
        self.failing_args.borrow_mut().push(arg.to_string());
        self
    }

    pub fn require_unsigned(self) -> Self {
        self.require_unsigned.set(true);
        self
    }

    /// Calls whose arguments include `flag`.
    pub fn calls_with(&self, flag: &str) -> Vec<ToolInvocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.has_flag(flag))
            .cloned()
            .collect()
    }

    pub fn count(&self, flag: &str) -> usize {
        self.calls_with(flag).len()
    }

    fn reply(exit_code: i32, output: impl Into<String>) -> ToolOutput {
        ToolOutput {
            exit_code,
            output: output.into(),
        }
    }

    fn path_option(invocation: &ToolInvocation, name: &str) -> Option<PathBuf> {
        invocation.option_value(name).map(PathBuf::from)
    }

    fn index_option(invocation: &ToolInvocation, name: &str) -> Option<usize> {
        invocation.option_value(name).and_then(|v| v.parse().ok())
    }

    fn image_info(invocation: &ToolInvocation) -> ToolOutput {
        let Some(container) = Self::path_option(invocation, "ImageFile") else {
            return Self::reply(87, "Error: 87\n\nThe image file option is missing.");
        };
        if !container.is_file() {
            return Self::reply(2, "Error: 2\n\nThe system cannot find the file specified.");
        }

        let mut out = String::from(
            "\nDeployment Image Servicing and Management tool\nVersion: 10.0.22621.2792\n\n",
        );
        out.push_str(&format!("Details for image : {}\n\n", container.display()));
        for (i, (name, description, size)) in read_container(&container).iter().enumerate() {
            out.push_str(&format!(
                "Index : {}\nName : {}\nDescription : {}\nSize : {} bytes\n\n",
                i + 1,
                name,
                description,
                group_digits(*size)
            ));
        }
        out.push_str("The operation completed successfully.\n");
        Self::reply(0, out)
    }

    fn mount(&self, invocation: &ToolInvocation) -> ToolOutput {
        let (Some(container), Some(index), Some(mount_dir)) = (
            Self::path_option(invocation, "ImageFile"),
            Self::index_option(invocation, "Index"),
            Self::path_option(invocation, "MountDir"),
        ) else {
            return Self::reply(87, "Error: 87");
        };
        let images = read_container(&container);
        if index == 0 || index > images.len() {
            return Self::reply(87, "Error: 0xc1420115\n\nThe specified image does not exist.");
        }

        let system32 = mount_dir.join("Windows/System32");
        write_file(&system32.join("winpeshl.exe"), "");
        write_file(&mount_dir.join("Windows/index.txt"), &images[index - 1].0);
        match self.tree.get() {
            MountedTree::StandardPe => {}
            MountedTree::Pecmd => {
                write_file(&system32.join("pecmd.exe"), "");
                write_file(&system32.join("pecmd.ini"), PECMD_INI);
            }
            MountedTree::BrokenPecmd => {
                write_file(&system32.join("pecmd.exe"), "");
                fs::create_dir_all(system32.join("pecmd.ini")).expect("Failed to create dir");
            }
        }
        Self::reply(0, "Mounting image\n[==========================100.0%==========================]\nThe operation completed successfully.")
    }

    fn unmount(&self, invocation: &ToolInvocation) -> ToolOutput {
        let Some(mount_dir) = Self::path_option(invocation, "MountDir") else {
            return Self::reply(87, "Error: 87");
        };
        let pecmd_ini = fs::read_to_string(mount_dir.join("Windows/System32/pecmd.ini")).ok();
        self.snapshots.borrow_mut().push(UnmountSnapshot {
            commit: invocation.has_flag("/Commit"),
            files: list_tree(&mount_dir),
            pecmd_ini,
        });
        Self::reply(0, "The operation completed successfully.")
    }

    fn add_driver(&self, invocation: &ToolInvocation) -> ToolOutput {
        let driver_dir = Self::path_option(invocation, "Driver");
        if !driver_dir.is_some_and(|d| d.is_dir()) {
            return Self::reply(2, "Error: 2\n\nThe driver path does not exist.");
        }
        if self.require_unsigned.get() && !invocation.has_flag("/ForceUnsigned") {
            return Self::reply(50, "Error: 50\n\nThe driver package is not signed.");
        }
        Self::reply(0, "Installing driver package\nThe driver package was successfully installed.")
    }

    fn export(invocation: &ToolInvocation, on_line: &mut dyn FnMut(&str)) -> ToolOutput {
        let (Some(source), Some(index), Some(destination)) = (
            Self::path_option(invocation, "SourceImageFile"),
            Self::index_option(invocation, "SourceIndex"),
            Self::path_option(invocation, "DestinationImageFile"),
        ) else {
            return Self::reply(87, "Error: 87");
        };
        let images = read_container(&source);
        if index == 0 || index > images.len() {
            return Self::reply(87, "Error: 87\n\nThe specified image does not exist.");
        }

        for marker in ["[====       25.0%            ]", "[========== 60.0%==         ]", "[==========100.0%==========]"] {
            on_line(marker);
        }
        let mut existing = fs::read_to_string(&destination).unwrap_or_default();
        let (name, description, size) = &images[index - 1];
        existing.push_str(&format!("{}|{}|{}\n", name, description, size));
        write_file(&destination, &existing);
        Self::reply(0, "Exporting image\nThe operation completed successfully.")
    }
}

impl ToolRunner for MockRunner {
    fn run(&self, invocation: &ToolInvocation, on_line: &mut dyn FnMut(&str)) -> anyhow::Result<ToolOutput> {
        self.calls.borrow_mut().push(invocation.clone());

        let failing = self.failing_args.borrow();
        if failing.iter().any(|arg| invocation.has_flag(arg)) {
            return Ok(Self::reply(1392, "Error: 1392\n\nThe file or directory is corrupted and unreadable."));
        }
        drop(failing);

        let output = if invocation.has_flag("/Get-ImageInfo") {
            Self::image_info(invocation)
        } else if invocation.has_flag("/Mount-Image") {
            self.mount(invocation)
        } else if invocation.has_flag("/Unmount-Image") {
            self.unmount(invocation)
        } else if invocation.has_flag("/Add-Driver") {
            self.add_driver(invocation)
        } else if invocation.has_flag("/Export-Image") {
            Self::export(invocation, on_line)
        } else if invocation.has_flag("/Cleanup-Mountpoints") {
            Self::reply(0, "The operation completed successfully.")
        } else {
            Self::reply(87, "Error: 87\n\nThe option is unknown.")
        };
        for line in output.output.lines() {
            on_line(line);
        }
        Ok(output)
    }
}

/// `1234567890` becomes `1,234,567,890`.
fn group_digits(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// =============================================================================
// Recording sink
// =============================================================================

#[derive(Default)]
pub struct RecordingSink {
    pub messages: RefCell<Vec<String>>,
    pub progress: RefCell<Vec<(u64, u64, String)>>,
}

impl RecordingSink {
    pub fn saw(&self, needle: &str) -> bool {
        self.messages.borrow().iter().any(|m| m.contains(needle))
    }
}

impl EventSink for RecordingSink {
    fn notify_log_update(&self, text: &str) {
        self.messages.borrow_mut().push(text.to_string());
    }

    fn notify_detailed_progress(&self, current: u64, total: u64, label: &str) {
        self.progress
            .borrow_mut()
            .push((current, total, label.to_string()));
    }
}

// =============================================================================
// Assertions
// =============================================================================

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.is_file(), "Expected file to exist: {}", path.display());
}
