//! Commit status receiver

use std::sync::Arc;

use sideload_events::{InstallEventBus, OsOutcome, Transition};
use sideload_platform::CommitCallback;
use sideload_types::{FailureKind, InstallStatus, StatusReport};
use tracing::{debug, warn};

/// Feeds the installer's asynchronous verdict into the state machine.
///
/// Applies directly to the bus from whatever thread the installer calls
/// back on. The pipeline flushes its queue before committing, so nothing it
/// published can land after these transitions.
pub struct CommitStatusReceiver {
    bus: Arc<InstallEventBus>,
}

impl CommitStatusReceiver {
    #[must_use]
    pub fn new(bus: Arc<InstallEventBus>) -> Self {
        Self { bus }
    }

    /// Classify a status report
    #[must_use]
    pub fn outcome(report: &StatusReport) -> OsOutcome {
        match (report.status, &report.pending_action) {
            (InstallStatus::Success, _) => OsOutcome::Success,
            (InstallStatus::PendingUserAction, Some(action)) => {
                OsOutcome::PendingUserAction(action.clone())
            }
            (InstallStatus::PendingUserAction, None) => OsOutcome::Failure(
                "installer requested confirmation without a confirmation handle".to_string(),
            ),
            (InstallStatus::Failure(kind), _) => {
                OsOutcome::Failure(failure_message(kind, report.message.as_deref()))
            }
        }
    }
}

fn failure_message(kind: FailureKind, message: Option<&str>) -> String {
    match message.map(str::trim) {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => kind.default_message().to_string(),
    }
}

impl CommitCallback for CommitStatusReceiver {
    fn on_status(&self, report: StatusReport) {
        let outcome = Self::outcome(&report);
        match self.bus.emit(Transition::OsStatus(outcome)) {
            Ok(state) => debug!(
                session_id = %report.session_id,
                state = state.name(),
                "applied installer status"
            ),
            Err(err) => warn!(
                session_id = %report.session_id,
                error = %err,
                "ignored installer status"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sideload_types::{PendingUserAction, SessionId};

    #[test]
    fn failure_without_message_uses_kind_text() {
        let report = StatusReport::failure(SessionId(3), FailureKind::Storage, None);
        assert_eq!(
            CommitStatusReceiver::outcome(&report),
            OsOutcome::Failure("not enough storage to install".into())
        );

        let report = StatusReport::failure(SessionId(3), FailureKind::Conflict, Some(" ".into()));
        assert_eq!(
            CommitStatusReceiver::outcome(&report),
            OsOutcome::Failure(FailureKind::Conflict.default_message().into())
        );
    }

    #[test]
    fn installer_message_wins() {
        let report = StatusReport::failure(
            SessionId(1),
            FailureKind::Generic,
            Some("INSTALL_FAILED_VERSION_DOWNGRADE".into()),
        );
        assert_eq!(
            CommitStatusReceiver::outcome(&report),
            OsOutcome::Failure("INSTALL_FAILED_VERSION_DOWNGRADE".into())
        );
    }

    #[test]
    fn pending_report_carries_handle() {
        let report = StatusReport::pending(SessionId(9), "intent:confirm");
        assert_eq!(
            CommitStatusReceiver::outcome(&report),
            OsOutcome::PendingUserAction(PendingUserAction::new(SessionId(9), "intent:confirm"))
        );
        assert_eq!(
            CommitStatusReceiver::outcome(&StatusReport::success(SessionId(9))),
            OsOutcome::Success
        );
    }
}
