//! External tool availability checks.

use std::path::Path;

use crate::config::Config;
use crate::process;

use super::types::CheckResult;

/// Check the servicing tool and the archive tool are available.
pub fn check_host_tools(config: &Config) -> Vec<CheckResult> {
    vec![
        check_tool(
            "DISM",
            &config.dism_path,
            "Required to mount, service, and export images. Set DISM_PATH.",
        ),
        check_tool(
            "7-Zip",
            &config.seven_zip_path,
            "Required to read ISO sources. Install 7-Zip or set SEVEN_ZIP_PATH.",
        ),
    ]
}

/// A configured tool passes if it is an existing file or resolves on PATH.
fn check_tool(name: &str, program: &Path, hint: &str) -> CheckResult {
    if program.is_file() {
        return CheckResult::pass_with(name, &program.display().to_string());
    }
    match process::which(&program.to_string_lossy()) {
        Some(path) => CheckResult::pass_with(name, &path.display().to_string()),
        None => CheckResult::fail(
            name,
            &format!("{} not found. {}", program.display(), hint),
        ),
    }
}
