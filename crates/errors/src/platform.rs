//! Errors raised by the OS collaborators (installer, package query, manifest parser)

use std::borrow::Cow;

use crate::{InstallError, UserFacingError};
use thiserror::Error;

/// Errors that can occur while talking to the platform services
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PlatformError {
    #[error("process execution failed: {command} - {message}")]
    ProcessExecutionFailed { command: String, message: String },

    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("installer rejected the request: {message}")]
    InstallerRejected { message: String },

    #[error("filesystem operation failed: {operation} - {message}")]
    FilesystemOperationFailed { operation: String, message: String },

    #[error("manifest could not be parsed: {message}")]
    ManifestUnreadable { message: String },
}

impl PlatformError {
    /// Map a spawn failure onto `CommandNotFound` when the binary is missing.
    #[must_use]
    pub fn from_spawn(command: &str, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::CommandNotFound {
                command: command.to_string(),
            }
        } else {
            Self::ProcessExecutionFailed {
                command: command.to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<PlatformError> for InstallError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::InstallerRejected { message } => {
                InstallError::OsReportedFailure { message }
            }
            PlatformError::ManifestUnreadable { message } => InstallError::ManifestParseFailure {
                path: String::new(),
                message,
            },
            other => InstallError::TaskError {
                message: other.to_string(),
            },
        }
    }
}

impl UserFacingError for PlatformError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::CommandNotFound { .. } => {
                Some("Install the Android platform tools or set SIDELOAD_ADB / SIDELOAD_AAPT.")
            }
            Self::ProcessExecutionFailed { .. } => {
                Some("Check that exactly one device is connected, or pass --serial.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::ProcessExecutionFailed { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::ProcessExecutionFailed { .. } => "platform.process_failed",
            Self::CommandNotFound { .. } => "platform.command_not_found",
            Self::UnexpectedOutput { .. } => "platform.unexpected_output",
            Self::InstallerRejected { .. } => "platform.installer_rejected",
            Self::FilesystemOperationFailed { .. } => "platform.filesystem",
            Self::ManifestUnreadable { .. } => "platform.manifest_unreadable",
        };
        Some(code)
    }
}
