//! Installed-package lookup through `adb shell pm path`

use sideload_errors::{Error, PlatformError};
use tracing::debug;

use super::AdbTarget;
use crate::query::PackageQuery;

#[derive(Debug, Clone)]
pub struct AdbPackageQuery {
    target: AdbTarget,
}

impl AdbPackageQuery {
    #[must_use]
    pub fn new(target: AdbTarget) -> Self {
        Self { target }
    }
}

impl PackageQuery for AdbPackageQuery {
    fn is_installed(&self, package_id: &str) -> Result<bool, Error> {
        let output = self.target.shell(["pm", "path", package_id]).output()?;
        let stdout = output.stdout_str();
        let installed = has_package_path(&stdout);

        // pm exits 1 with empty output for unknown packages; adb itself
        // failing (no device, unauthorized) reports on stderr instead
        if !installed && !output.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.trim_start().starts_with("error:") || stderr.contains("adb:") {
                return Err(PlatformError::ProcessExecutionFailed {
                    command: "adb shell pm path".to_string(),
                    message: stderr.trim().to_string(),
                }
                .into());
            }
        }

        debug!(package_id, installed, "queried installed package");
        Ok(installed)
    }
}

/// Whether `pm path` output lists at least one installed APK
#[must_use]
pub fn has_package_path(stdout: &str) -> bool {
    stdout
        .lines()
        .any(|line| line.trim_start().starts_with("package:"))
}
