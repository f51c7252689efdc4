//! Android debug bridge backend
//!
//! Drives the package manager of a connected device through `adb` and reads
//! package manifests on the host with `aapt dump badging`.

pub mod aapt;
pub mod installer;
pub mod query;

pub use aapt::AaptManifestParser;
pub use installer::AdbInstaller;
pub use query::AdbPackageQuery;

use std::path::{Path, PathBuf};

use regex::Regex;
use sideload_errors::{Error, PlatformError};
use sideload_types::FailureKind;

use crate::process::PlatformCommand;

/// Which `adb` binary to run and which device to address
#[derive(Debug, Clone)]
pub struct AdbTarget {
    adb_path: PathBuf,
    serial: Option<String>,
}

impl AdbTarget {
    #[must_use]
    pub fn new(adb_path: impl Into<PathBuf>, serial: Option<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
        }
    }

    #[must_use]
    pub fn adb_path(&self) -> &Path {
        &self.adb_path
    }

    #[must_use]
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn base(&self) -> PlatformCommand {
        let mut cmd = PlatformCommand::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial.as_str()]);
        }
        cmd
    }

    /// `adb [-s SERIAL] shell <args>`
    #[must_use]
    pub fn shell<I, S>(&self, args: I) -> PlatformCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        let mut cmd = self.base();
        cmd.arg("shell").args(args);
        cmd
    }

    /// `adb [-s SERIAL] exec-in <args>`, a binary-safe stdin channel
    #[must_use]
    pub fn exec_in<I, S>(&self, args: I) -> PlatformCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        let mut cmd = self.base();
        cmd.arg("exec-in").args(args);
        cmd
    }
}

/// Whether package manager output reports success
#[must_use]
pub fn is_pm_success(output: &str) -> bool {
    output.lines().any(|line| line.trim_start().starts_with("Success"))
}

/// Extract the id from `Success: created install session [1234]`
///
/// # Errors
///
/// Returns `UnexpectedOutput` if the output does not name a session.
pub fn parse_session_id(output: &str) -> Result<i32, Error> {
    let re = Regex::new(r"session \[(-?\d+)\]").map_err(|e| Error::internal(e.to_string()))?;
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| {
            PlatformError::UnexpectedOutput {
                command: "pm install-create".to_string(),
                output: output.trim().to_string(),
            }
            .into()
        })
}

/// Map a `Failure [INSTALL_FAILED_...: detail]` line onto a failure kind
#[must_use]
pub fn classify_pm_failure(output: &str) -> FailureKind {
    let code = output
        .split_once('[')
        .map_or(output, |(_, rest)| rest)
        .split([':', ']'])
        .next()
        .unwrap_or_default()
        .trim();

    if code.contains("INSUFFICIENT_STORAGE") {
        FailureKind::Storage
    } else if code.contains("ALREADY_EXISTS")
        || code.contains("CONFLICTING")
        || code.contains("DUPLICATE")
        || code.contains("UPDATE_INCOMPATIBLE")
        || code.contains("VERSION_DOWNGRADE")
    {
        FailureKind::Conflict
    } else if code.contains("OLDER_SDK")
        || code.contains("NEWER_SDK")
        || code.contains("NO_MATCHING_ABIS")
        || code.contains("MISSING_SHARED_LIBRARY")
        || code.contains("MISSING_FEATURE")
        || code.contains("CPU_ABI_INCOMPATIBLE")
    {
        FailureKind::Incompatible
    } else if code.contains("VERIFICATION_TIMEOUT") {
        FailureKind::Timeout
    } else if code.contains("USER_RESTRICTED") || code.contains("VERIFICATION_FAILURE") {
        FailureKind::Blocked
    } else if code.contains("ABORTED") {
        FailureKind::Aborted
    } else if code.starts_with("INSTALL_PARSE_FAILED")
        || code.contains("INVALID")
        || code.contains("NO_CERTIFICATES")
        || code.contains("BAD_")
    {
        FailureKind::Invalid
    } else {
        FailureKind::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_read_from_create_output() {
        let id = parse_session_id("Success: created install session [1838254919]\n").unwrap();
        assert_eq!(id, 1_838_254_919);
        assert!(parse_session_id("Error: java.lang.SecurityException").is_err());
    }

    #[test]
    fn failure_codes_are_classified() {
        let cases = [
            ("Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]", FailureKind::Storage),
            (
                "Failure [INSTALL_FAILED_VERSION_DOWNGRADE: Downgrade detected]",
                FailureKind::Conflict,
            ),
            ("Failure [INSTALL_FAILED_NO_MATCHING_ABIS: x86]", FailureKind::Incompatible),
            ("Failure [INSTALL_PARSE_FAILED_NOT_APK]", FailureKind::Invalid),
            ("Failure [INSTALL_FAILED_ABORTED: User rejected]", FailureKind::Aborted),
            ("Failure [INSTALL_FAILED_USER_RESTRICTED]", FailureKind::Blocked),
            ("something unexpected", FailureKind::Generic),
        ];
        for (output, kind) in cases {
            assert_eq!(classify_pm_failure(output), kind, "{output}");
        }
    }

    #[test]
    fn serial_is_passed_before_subcommand() {
        let target = AdbTarget::new("adb", Some("emulator-5554".to_string()));
        let line = target.shell(["pm", "install-abandon", "7"]).display();
        assert_eq!(line, "adb -s emulator-5554 shell pm install-abandon 7");
        assert!(is_pm_success("Success\n"));
        assert!(!is_pm_success("Failure [INSTALL_FAILED_ABORTED]"));
    }
}
