//! Install state machine
//!
//! Every producer (the session pipeline, the analysis path, the OS commit
//! callback and user actions) describes what happened as a [`Transition`].
//! [`next_state`] is the only place that decides which state follows, so the
//! pipeline and the callback receiver can never disagree about legality.

use sideload_errors::InstallError;
use sideload_types::{InstallState, PackageMetadata, PendingUserAction};

/// Outcome reported by the OS installer through the commit callback
#[derive(Debug, Clone, PartialEq)]
pub enum OsOutcome {
    PendingUserAction(PendingUserAction),
    Success,
    Failure(String),
}

/// Trigger that moves the install state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// User picked a source to analyse
    SourceSelected,
    /// Analysis finished
    MetadataResolved {
        meta: PackageMetadata,
        is_update: bool,
    },
    /// User confirmed the install; the pipeline starts scanning the source
    InstallConfirmed,
    /// Session is open and bytes are about to flow
    WriteStarted,
    /// Fraction of source bytes consumed
    Progress(f32),
    /// Asynchronous status from the OS installer
    OsStatus(OsOutcome),
    /// Any failure at any stage
    Failed(String),
    /// User reset or retry
    Reset,
}

impl Transition {
    /// Stable lowercase name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SourceSelected => "source_selected",
            Self::MetadataResolved { .. } => "metadata_resolved",
            Self::InstallConfirmed => "install_confirmed",
            Self::WriteStarted => "write_started",
            Self::Progress(_) => "progress",
            Self::OsStatus(OsOutcome::PendingUserAction(_)) => "os_pending_user_action",
            Self::OsStatus(OsOutcome::Success) => "os_success",
            Self::OsStatus(OsOutcome::Failure(_)) => "os_failure",
            Self::Failed(_) => "failed",
            Self::Reset => "reset",
        }
    }
}

/// Compute the state that `transition` leads to from `current`.
///
/// # Errors
///
/// Returns `InstallError::IllegalTransition` when the trigger is not allowed
/// in the current state. The caller keeps the current state in that case.
pub fn next_state(
    current: &InstallState,
    transition: &Transition,
) -> Result<InstallState, InstallError> {
    use InstallState as S;
    use Transition as T;

    let next = match (current, transition) {
        (_, T::Reset) => Some(S::Idle),

        (
            S::Idle | S::ReadyToInstall { .. } | S::Success | S::Error { .. },
            T::SourceSelected,
        )
        | (S::ReadyToInstall { .. }, T::InstallConfirmed) => Some(S::Parsing),

        (S::Parsing, T::MetadataResolved { meta, is_update }) => Some(S::ReadyToInstall {
            meta: meta.clone(),
            is_update: *is_update,
        }),

        (S::Parsing, T::WriteStarted) => Some(S::installing(0.0)),

        (S::Installing { progress: previous }, T::Progress(progress)) => {
            let next = S::installing(*progress);
            match next.progress() {
                Some(value) if value >= *previous => Some(next),
                _ => None,
            }
        }

        (
            S::Installing { .. } | S::UserConfirmationRequired { .. },
            T::OsStatus(OsOutcome::PendingUserAction(action)),
        ) => Some(S::UserConfirmationRequired {
            pending_action: action.clone(),
        }),

        (S::Installing { .. } | S::UserConfirmationRequired { .. }, T::OsStatus(OsOutcome::Success)) => {
            Some(S::Success)
        }

        (
            S::Installing { .. } | S::UserConfirmationRequired { .. },
            T::OsStatus(OsOutcome::Failure(message)),
        )
        | (
            S::Parsing
            | S::ReadyToInstall { .. }
            | S::Installing { .. }
            | S::UserConfirmationRequired { .. },
            T::Failed(message),
        ) => Some(S::error(message.clone())),

        _ => None,
    };

    next.ok_or_else(|| InstallError::IllegalTransition {
        from: current.name().to_string(),
        trigger: transition.name().to_string(),
    })
}
