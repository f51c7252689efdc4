//! Installation pipeline error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum InstallError {
    #[error("cannot open source {origin}: {message}")]
    SourceUnreadable { origin: String, message: String },

    #[error("unsupported or corrupt archive {origin}: {message}")]
    UnsupportedOrCorruptArchive { origin: String, message: String },

    #[error("no valid package found in {origin}")]
    NoInstallablePackageFound { origin: String },

    #[error("no valid package files found in {origin}")]
    NoPackageFilesWritten { origin: String },

    #[error("failed to parse package manifest {path}: {message}")]
    ManifestParseFailure { path: String, message: String },

    #[error("failed to {operation} install session: {message}")]
    SessionCreateFailure { operation: String, message: String },

    #[error("failed to write {entry} into install session: {message}")]
    SessionWriteFailure { entry: String, message: String },

    #[error("failed to commit install session {session_id}: {message}")]
    CommitFailure { session_id: i32, message: String },

    #[error("failed to abandon install session {session_id}: {message}")]
    AbandonFailure { session_id: i32, message: String },

    #[error("installer reported failure: {message}")]
    OsReportedFailure { message: String },

    #[error("illegal state transition: {trigger} while {from}")]
    IllegalTransition { from: String, trigger: String },

    #[error("another installation attempt is still in progress")]
    AttemptInProgress,

    #[error("task execution failed: {message}")]
    TaskError { message: String },
}

impl UserFacingError for InstallError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::SourceUnreadable { .. } => Some("Check that the file exists and is readable."),
            Self::NoInstallablePackageFound { .. } | Self::NoPackageFilesWritten { .. } => {
                Some("Select an .apk file or an .xapk/.apks/.zip bundle containing .apk files.")
            }
            Self::ManifestParseFailure { .. } => {
                Some("The package may be corrupt or built for an unsupported format.")
            }
            Self::SessionCreateFailure { .. } | Self::CommitFailure { .. } => {
                Some("Make sure the device is connected and has free storage, then retry.")
            }
            Self::AttemptInProgress => Some("Wait for the running installation to finish."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnreadable { .. }
                | Self::SessionCreateFailure { .. }
                | Self::SessionWriteFailure { .. }
                | Self::CommitFailure { .. }
                | Self::AttemptInProgress
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::SourceUnreadable { .. } => "install.source_unreadable",
            Self::UnsupportedOrCorruptArchive { .. } => "install.corrupt_archive",
            Self::NoInstallablePackageFound { .. } => "install.no_package_found",
            Self::NoPackageFilesWritten { .. } => "install.no_package_files",
            Self::ManifestParseFailure { .. } => "install.manifest_parse_failure",
            Self::SessionCreateFailure { .. } => "install.session_create_failure",
            Self::SessionWriteFailure { .. } => "install.session_write_failure",
            Self::CommitFailure { .. } => "install.commit_failure",
            Self::AbandonFailure { .. } => "install.abandon_failure",
            Self::OsReportedFailure { .. } => "install.os_reported_failure",
            Self::IllegalTransition { .. } => "install.illegal_transition",
            Self::AttemptInProgress => "install.attempt_in_progress",
            Self::TaskError { .. } => "install.task_error",
        };
        Some(code)
    }
}
