//! Integration tests for image servicing against a scripted DISM.
//!
//! These tests drive the real mount, metadata, export, and driver code
//! through `MockRunner`, which stands in for the servicing tool.

mod helpers;

use bootwim::drivers::{CategoryFilter, DriverIntegrator};
use bootwim::error::ServicingError;
use bootwim::image::{get_images, select_best_index_for, EditionExporter, MountController, ServicingTool};
use bootwim::runlog::RunLog;
use helpers::{list_tree, read_container, write_container, write_file, MockRunner, TestEnv};
use sha2::{Digest, Sha256};
use std::fs;

fn no_progress(_: u32, _: &str) {}

fn sha256(path: &std::path::Path) -> Vec<u8> {
    Sha256::digest(fs::read(path).unwrap()).to_vec()
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_get_images_reports_every_index_in_order() {
    let env = TestEnv::new();
    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);

    for count in 1..=5u32 {
        let container = env.root().join(format!("c{}.wim", count));
        let names: Vec<String> = (1..=count).map(|i| format!("Edition {}", i)).collect();
        let images: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "desc")).collect();
        write_container(&container, &images);

        let records = get_images(&tool, &container);
        assert_eq!(records.len(), count as usize);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.index, i as u32 + 1);
            assert_eq!(record.name, names[i]);
            assert!(record.size_bytes > 100_000_000);
        }
    }
}

#[test]
fn test_missing_container_yields_no_records() {
    let env = TestEnv::new();
    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);

    assert!(get_images(&tool, &env.root().join("absent.wim")).is_empty());
    assert_eq!(select_best_index_for(&tool, &env.root().join("absent.wim")), 1);
}

#[test]
fn test_best_index_prefers_setup_image() {
    let env = TestEnv::new();
    let container = env.root().join("boot.wim");
    write_container(
        &container,
        &[
            ("Microsoft Windows Setup (amd64)", "Microsoft Windows Setup (amd64)"),
            ("Microsoft Windows PE (amd64)", "Microsoft Windows PE (amd64)"),
            ("Microsoft Windows Recovery Environment", "WinRE"),
        ],
    );
    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);

    assert_eq!(select_best_index_for(&tool, &container), 1);
}

// =============================================================================
// Mount lifecycle
// =============================================================================

#[test]
fn test_mount_then_discard_leaves_container_untouched() {
    let env = TestEnv::new();
    let container = env.root().join("boot.wim");
    write_container(&container, &[("WinPE", "WinPE")]);
    let digest = sha256(&container);
    let mtime = fs::metadata(&container).unwrap().modified().unwrap();

    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let controller = MountController::new(&tool);
    let mount_dir = env.root().join("mount");

    let mut session = controller
        .mount(&container, &mount_dir, 1, &mut no_progress)
        .unwrap();
    assert!(session.is_mounted());
    assert!(mount_dir.join("Windows/System32").is_dir());

    controller.unmount(&mut session, false, &mut no_progress).unwrap();

    assert!(!mount_dir.exists());
    assert_eq!(sha256(&container), digest);
    assert_eq!(fs::metadata(&container).unwrap().modified().unwrap(), mtime);
    assert_eq!(runner.count("/Discard"), 1);
    assert_eq!(runner.count("/Commit"), 0);
}

#[test]
fn test_repeated_commit_cycles_survive_dirty_mount_dir() {
    let env = TestEnv::new();
    let container = env.root().join("boot.wim");
    write_container(&container, &[("WinPE", "WinPE"), ("Setup", "Setup")]);

    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let controller = MountController::new(&tool);
    let mount_dir = env.root().join("mount");

    let mut first = controller.mount(&container, &mount_dir, 2, &mut no_progress).unwrap();
    controller.unmount(&mut first, true, &mut no_progress).unwrap();
    assert!(!mount_dir.exists());

    // Leftovers from an interrupted run.
    write_file(&mount_dir.join("stale/leftover.txt"), "old");

    let mut second = controller.mount(&container, &mount_dir, 2, &mut no_progress).unwrap();
    controller.unmount(&mut second, true, &mut no_progress).unwrap();

    let snapshots = runner.snapshots.borrow();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().all(|s| s.commit));
    assert!(!snapshots[1].files.iter().any(|f| f.contains("leftover")));
    assert_eq!(snapshots[0].files, snapshots[1].files);
    assert!(!mount_dir.exists());
}

#[test]
fn test_mount_failure_carries_tool_output() {
    let env = TestEnv::new();
    let container = env.root().join("boot.wim");
    write_container(&container, &[("WinPE", "WinPE")]);

    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let mount_dir = env.root().join("mount");

    let mut reported = Vec::new();
    let err = MountController::new(&tool)
        .mount(&container, &mount_dir, 3, &mut |pct, _| reported.push(pct))
        .unwrap_err();

    match &err {
        ServicingError::ToolInvocationFailure { exit_code, output, .. } => {
            assert_eq!(*exit_code, 87);
            assert!(output.contains("does not exist"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(reported, vec![10, 0]);
    assert!(!mount_dir.exists());
}

#[test]
fn test_unmount_failure_still_removes_mount_dir() {
    let env = TestEnv::new();
    let container = env.root().join("boot.wim");
    write_container(&container, &[("WinPE", "WinPE")]);

    let runner = MockRunner::new().fail_on("/Commit");
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let controller = MountController::new(&tool);
    let mount_dir = env.root().join("mount");

    let mut session = controller.mount(&container, &mount_dir, 1, &mut no_progress).unwrap();
    assert!(controller.unmount(&mut session, true, &mut no_progress).is_err());
    assert!(!session.is_mounted());
    assert!(!mount_dir.exists());
}

// =============================================================================
// Export
// =============================================================================

#[test]
fn test_export_maps_selection_in_caller_order() {
    let env = TestEnv::new();
    let source = env.root().join("install.esd");
    write_container(
        &source,
        &[
            ("Windows 11 Home", "Home"),
            ("Windows 11 Education", "Education"),
            ("Windows 11 Pro", "Pro"),
        ],
    );
    let destination = env.root().join("out/install.wim");

    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let mut progress = Vec::new();
    EditionExporter::new(&tool)
        .export(&source, &[3, 1], &destination, &mut |pct, _| progress.push(pct))
        .unwrap();

    let exported = get_images(&tool, &destination);
    assert_eq!(exported.len(), 2);
    assert_eq!(exported[0].index, 1);
    assert_eq!(exported[0].name, "Windows 11 Pro");
    assert_eq!(exported[1].index, 2);
    assert_eq!(exported[1].name, "Windows 11 Home");

    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[test]
fn test_export_replaces_existing_destination() {
    let env = TestEnv::new();
    let source = env.root().join("install.wim");
    write_container(&source, &[("Home", "Home"), ("Pro", "Pro")]);
    let destination = env.root().join("filtered.wim");
    write_container(&destination, &[("Stale", "Stale"), ("Stale", "Stale")]);

    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    EditionExporter::new(&tool)
        .export(&source, &[2], &destination, &mut no_progress)
        .unwrap();

    let names: Vec<String> = read_container(&destination).into_iter().map(|(n, _, _)| n).collect();
    assert_eq!(names, vec!["Pro"]);
}

#[test]
fn test_export_stops_at_failing_index() {
    let env = TestEnv::new();
    let source = env.root().join("install.wim");
    write_container(&source, &[("Home", "Home"), ("Pro", "Pro"), ("Edu", "Edu")]);
    let destination = env.root().join("filtered.wim");

    let runner = MockRunner::new().fail_on("/SourceIndex:2");
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let err = EditionExporter::new(&tool)
        .export(&source, &[1, 2, 3], &destination, &mut no_progress)
        .unwrap_err();

    assert!(err.to_string().contains("index 2"));
    assert_eq!(runner.count("/Export-Image"), 2);
    assert_eq!(read_container(&destination).len(), 1);
}

#[test]
fn test_empty_selection_never_calls_tool() {
    let env = TestEnv::new();
    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);

    let result = EditionExporter::new(&tool).export(
        &env.root().join("install.wim"),
        &[],
        &env.root().join("out.wim"),
        &mut no_progress,
    );
    assert!(result.is_err());
    assert!(runner.calls.borrow().is_empty());
}

// =============================================================================
// Driver injection
// =============================================================================

#[test]
fn test_unsigned_retry_and_staging_cleanup() {
    let env = TestEnv::new();
    env.store_package("stornvme.inf_amd64_1", "[Version]\r\nClass=SCSIAdapter\r\n");
    env.store_package("netrtwlane.inf_amd64_2", "[Version]\r\nClass=Net\r\n");
    env.store_package("prnms001.inf_amd64_3", "[Version]\r\nClass=Printer\r\n");
    let mount_dir = env.root().join("mount");
    fs::create_dir_all(&mount_dir).unwrap();

    let runner = MockRunner::new().require_unsigned();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let mut integrator = DriverIntegrator::new(&tool, &env.store, &env.work);

    let count = integrator.integrate_system(&mount_dir, CategoryFilter::All).unwrap();
    assert_eq!(count, 2);

    let calls = runner.calls_with("/Add-Driver");
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].has_flag("/ForceUnsigned"));
    assert!(calls[1].has_flag("/ForceUnsigned"));

    let stats = integrator.stats();
    assert_eq!((stats.storage, stats.network, stats.usb), (1, 1, 0));
    assert!(list_tree(&env.work).is_empty());
}

#[test]
fn test_rejected_unsigned_retry_fails_and_removes_staging() {
    let env = TestEnv::new();
    env.store_package("stornvme.inf_amd64_1", "[Version]\r\nClass=SCSIAdapter\r\n");
    let mount_dir = env.root().join("mount");
    fs::create_dir_all(&mount_dir).unwrap();

    let runner = MockRunner::new().fail_on("/Add-Driver");
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let mut integrator = DriverIntegrator::new(&tool, &env.store, &env.work);

    let err = integrator
        .integrate_system(&mount_dir, CategoryFilter::All)
        .unwrap_err();
    match err {
        ServicingError::ToolInvocationFailure { operation, exit_code, .. } => {
            assert_eq!(exit_code, 1392);
            assert!(operation.contains("unsigned"), "{}", operation);
        }
        other => panic!("expected tool failure, got {:?}", other),
    }

    let calls = runner.calls_with("/Add-Driver");
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].has_flag("/ForceUnsigned"));
    assert!(calls[1].has_flag("/ForceUnsigned"));
    assert!(list_tree(&env.work).is_empty());
}

#[test]
fn test_storage_only_filter() {
    let env = TestEnv::new();
    env.store_package("iastorac.inf_amd64_1", "[Version]\r\n");
    env.store_package("usbxhci.inf_amd64_2", "[Version]\r\n");
    let mount_dir = env.root().join("mount");
    fs::create_dir_all(&mount_dir).unwrap();

    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);
    let mut integrator = DriverIntegrator::new(&tool, &env.store, &env.work);

    let count = integrator
        .integrate_system(&mount_dir, CategoryFilter::Only(bootwim::drivers::DriverCategory::Storage))
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(runner.count("/Add-Driver"), 1);
}

#[test]
fn test_empty_store_never_calls_tool() {
    let env = TestEnv::new();
    fs::create_dir_all(&env.store).unwrap();
    let runner = MockRunner::new();
    let log = RunLog::disabled();
    let tool = ServicingTool::with_program(&runner, "dism.exe", &log);

    let err = DriverIntegrator::new(&tool, &env.store, &env.work)
        .integrate_system(&env.root().join("mount"), CategoryFilter::All)
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(runner.calls.borrow().is_empty());
}
