//! The install lifecycle as observed by subscribers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::package::PackageMetadata;
use crate::status::SessionId;

/// Opaque handle the OS hands out when it needs the user to approve an
/// install. Front-ends pass it back to the OS to launch the confirmation UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUserAction {
    session_id: SessionId,
    token: String,
}

impl PendingUserAction {
    #[must_use]
    pub fn new(session_id: SessionId, token: impl Into<String>) -> Self {
        Self {
            session_id,
            token: token.into(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Installation lifecycle state
///
/// Exactly one state is current per installation attempt. Only
/// `ReadyToInstall`, `Installing`, `UserConfirmationRequired` and `Error`
/// carry data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallState {
    /// No operation in progress
    #[default]
    Idle,
    /// Archive inspection or metadata extraction in progress
    Parsing,
    /// Metadata resolved, waiting for the user to confirm
    ReadyToInstall {
        meta: PackageMetadata,
        is_update: bool,
    },
    /// Bytes are being streamed into the install session
    Installing { progress: f32 },
    /// The OS wants interactive approval before it proceeds
    UserConfirmationRequired { pending_action: PendingUserAction },
    /// The OS reported success
    Success,
    /// Any failure, at any stage
    Error { message: String },
}

impl InstallState {
    /// `Installing` with the fraction clamped into `[0.0, 1.0]`
    #[must_use]
    pub fn installing(progress: f32) -> Self {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        Self::Installing { progress }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Stable lowercase name, used for logging and illegal-transition reports
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Parsing => "parsing",
            Self::ReadyToInstall { .. } => "ready_to_install",
            Self::Installing { .. } => "installing",
            Self::UserConfirmationRequired { .. } => "user_confirmation_required",
            Self::Success => "success",
            Self::Error { .. } => "error",
        }
    }

    /// `Success` and `Error` end an attempt
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error { .. })
    }

    #[must_use]
    pub fn progress(&self) -> Option<f32> {
        match self {
            Self::Installing { progress } => Some(*progress),
            _ => None,
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Parsing => write!(f, "parsing package"),
            Self::ReadyToInstall { meta, is_update } => {
                let verb = if *is_update { "update" } else { "install" };
                write!(
                    f,
                    "ready to {verb} {} {} ({})",
                    meta.label, meta.version_name, meta.package_id
                )
            }
            Self::Installing { progress } => write!(f, "installing {:.0}%", progress * 100.0),
            Self::UserConfirmationRequired { .. } => write!(f, "waiting for user confirmation"),
            Self::Success => write!(f, "installed"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}
