//! Classification of the installer's asynchronous status reports

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::PendingUserAction;

/// Identifier of an OS install session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the installer refused or failed a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Generic,
    Blocked,
    Aborted,
    Invalid,
    Conflict,
    Storage,
    Incompatible,
    Timeout,
}

impl FailureKind {
    /// Text used when the installer gives no message of its own
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Generic => "installation failed",
            Self::Blocked => "installation was blocked",
            Self::Aborted => "installation was cancelled",
            Self::Invalid => "package is invalid or corrupt",
            Self::Conflict => "package conflicts with an installed app",
            Self::Storage => "not enough storage to install",
            Self::Incompatible => "package is incompatible with this device",
            Self::Timeout => "installation timed out",
        }
    }
}

/// Outcome class of a status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    PendingUserAction,
    Success,
    Failure(FailureKind),
}

impl InstallStatus {
    /// Classify a raw installer status code.
    ///
    /// Codes follow the Android `PackageInstaller.STATUS_*` numbering; any
    /// code outside the known set is a generic failure.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::PendingUserAction,
            0 => Self::Success,
            2 => Self::Failure(FailureKind::Blocked),
            3 => Self::Failure(FailureKind::Aborted),
            4 => Self::Failure(FailureKind::Invalid),
            5 => Self::Failure(FailureKind::Conflict),
            6 => Self::Failure(FailureKind::Storage),
            7 => Self::Failure(FailureKind::Incompatible),
            8 => Self::Failure(FailureKind::Timeout),
            _ => Self::Failure(FailureKind::Generic),
        }
    }

    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::PendingUserAction => -1,
            Self::Success => 0,
            Self::Failure(kind) => match kind {
                FailureKind::Generic => 1,
                FailureKind::Blocked => 2,
                FailureKind::Aborted => 3,
                FailureKind::Invalid => 4,
                FailureKind::Conflict => 5,
                FailureKind::Storage => 6,
                FailureKind::Incompatible => 7,
                FailureKind::Timeout => 8,
            },
        }
    }
}

/// What the installer delivers to the commit callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub session_id: SessionId,
    pub status: InstallStatus,
    /// Optional user-facing message from the installer
    pub message: Option<String>,
    /// Present when `status` is `PendingUserAction`
    pub pending_action: Option<PendingUserAction>,
}

impl StatusReport {
    #[must_use]
    pub fn success(session_id: SessionId) -> Self {
        Self {
            session_id,
            status: InstallStatus::Success,
            message: None,
            pending_action: None,
        }
    }

    #[must_use]
    pub fn failure(session_id: SessionId, kind: FailureKind, message: Option<String>) -> Self {
        Self {
            session_id,
            status: InstallStatus::Failure(kind),
            message,
            pending_action: None,
        }
    }

    #[must_use]
    pub fn pending(session_id: SessionId, token: impl Into<String>) -> Self {
        Self {
            session_id,
            status: InstallStatus::PendingUserAction,
            message: None,
            pending_action: Some(PendingUserAction::new(session_id, token)),
        }
    }
}
