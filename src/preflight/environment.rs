//! Servicing environment checks (driver store, scratch directories, privileges).

use std::fs;
use std::path::Path;

use crate::config::Config;

use super::types::CheckResult;

/// Check local directories and privileges.
pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if config.driver_store.is_dir() {
        let packages = fs::read_dir(&config.driver_store)
            .map(|entries| entries.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count())
            .unwrap_or(0);
        results.push(CheckResult::pass_with(
            "Driver store",
            &format!("{} package(s) in {}", packages, config.driver_store.display()),
        ));
    } else {
        results.push(CheckResult::warn(
            "Driver store",
            &format!(
                "{} not found - local driver injection will be skipped",
                config.driver_store.display()
            ),
        ));
    }

    results.push(check_writable("Work directory", &config.work_dir));
    results.push(check_writable("Log directory", &config.log_dir));
    results.push(check_elevation());

    results
}

/// Create `dir` if needed and write a probe file into it.
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    let probe = dir.join(".preflight-test");
    match fs::write(&probe, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

fn check_elevation() -> CheckResult {
    if cfg!(windows) {
        CheckResult::warn(
            "Elevation",
            "DISM needs an elevated prompt; run bootwim as Administrator",
        )
    } else {
        CheckResult::warn("Elevation", "Not running on Windows - DISM calls will fail")
    }
}
