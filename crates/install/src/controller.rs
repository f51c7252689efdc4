//! User-action facade over analysis, installation and the event bus

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sideload_archive::PackageSource;
use sideload_errors::{Error, InstallError, UserFacingError};
use sideload_events::{channel, spawn_forwarder, InstallEventBus, Subscription, Transition};
use sideload_platform::CommitCallback;
use sideload_types::InstallState;
use tracing::{error, info, warn};

use crate::analyzer::PackageAnalyzer;
use crate::pipeline::SessionPipeline;
use crate::receiver::CommitStatusReceiver;

/// Headline shown when a selected source cannot be analysed
pub const PARSE_FAILURE_MESSAGE: &str = "failed to parse package, is this a valid APK/XAPK?";

#[derive(Default)]
struct Selection {
    pending: Option<Arc<dyn PackageSource>>,
    package_id: Option<String>,
}

/// Drives one source at a time from selection to the installer's verdict
pub struct InstallerController {
    bus: Arc<InstallEventBus>,
    analyzer: Arc<PackageAnalyzer>,
    pipeline: Arc<SessionPipeline>,
    selection: Mutex<Selection>,
    attempt_running: AtomicBool,
}

impl InstallerController {
    /// Create the controller, resetting a finished attempt left on the bus
    #[must_use]
    pub fn new(
        bus: Arc<InstallEventBus>,
        analyzer: Arc<PackageAnalyzer>,
        pipeline: Arc<SessionPipeline>,
    ) -> Self {
        if bus.reset_stale_terminal() {
            info!("reset stale terminal install state");
        }
        Self {
            bus,
            analyzer,
            pipeline,
            selection: Mutex::new(Selection::default()),
            attempt_running: AtomicBool::new(false),
        }
    }

    fn selection(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Analyse `source` and remember it for [`Self::confirm_install`].
    ///
    /// Analysis failures are not errors here; they leave the bus in `Error`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptInProgress` while an installation runs, or
    /// `IllegalTransition` if the bus moved on (e.g. a reset) meanwhile.
    pub async fn select_source(
        &self,
        source: Arc<dyn PackageSource>,
    ) -> Result<InstallState, Error> {
        if self.attempt_running.load(Ordering::Acquire) {
            return Err(InstallError::AttemptInProgress.into());
        }
        *self.selection() = Selection::default();
        self.bus.emit(Transition::SourceSelected)?;

        match self.analyzer.analyze(Arc::clone(&source)).await {
            Ok(report) => {
                {
                    let mut selection = self.selection();
                    selection.package_id = Some(report.meta.package_id.clone());
                    selection.pending = Some(source);
                }
                self.bus.emit(Transition::MetadataResolved {
                    meta: report.meta,
                    is_update: report.is_update,
                })
            }
            Err(err) => {
                error!(source = %source.display_name(), error = %err, "package analysis failed");
                self.bus.emit(Transition::Failed(format!(
                    "{PARSE_FAILURE_MESSAGE} ({})",
                    err.user_message()
                )))
            }
        }
    }

    /// Install the analysed source. Does nothing without one.
    ///
    /// Returns once the session is committed (or the attempt failed); the
    /// installer's verdict arrives later on the bus.
    ///
    /// # Errors
    ///
    /// Returns `AttemptInProgress` if another attempt is running, or
    /// `IllegalTransition` if the bus is not `ReadyToInstall`. Pipeline
    /// failures are reported through the bus, not here.
    pub async fn confirm_install(&self) -> Result<InstallState, Error> {
        let Some(source) = self.selection().pending.clone() else {
            warn!("install confirmed without an analysed source");
            return Ok(self.bus.current());
        };
        if self.attempt_running.swap(true, Ordering::AcqRel) {
            return Err(InstallError::AttemptInProgress.into());
        }
        let _attempt = AttemptGuard(&self.attempt_running);

        self.bus.emit(Transition::InstallConfirmed)?;
        self.selection().pending = None;

        let (tx, rx) = channel();
        let forwarder = spawn_forwarder(Arc::clone(&self.bus), rx);
        let callback: Arc<dyn CommitCallback> =
            Arc::new(CommitStatusReceiver::new(Arc::clone(&self.bus)));
        let pipeline = Arc::clone(&self.pipeline);

        let outcome =
            tokio::task::spawn_blocking(move || pipeline.run(source.as_ref(), &tx, callback))
                .await;
        // The queue closes once the worker dropped its sender
        let _ = forwarder.await;

        match outcome {
            Ok(Ok(session_id)) => info!(%session_id, "install handed to the installer"),
            Ok(Err(err)) => warn!(error = %err, "install attempt failed"),
            Err(join_err) => {
                let err = InstallError::TaskError {
                    message: join_err.to_string(),
                };
                error!(error = %err, "install worker did not finish");
                let _ = self.bus.emit(Transition::Failed(err.user_message().into_owned()));
            }
        }
        Ok(self.bus.current())
    }

    /// Return to `Idle` and forget the selected source.
    ///
    /// Does not abort an installation already handed to the installer.
    pub fn reset(&self) -> InstallState {
        *self.selection() = Selection::default();
        self.bus
            .emit(Transition::Reset)
            .unwrap_or_else(|_| self.bus.current())
    }

    /// Package id of the last successfully analysed source
    #[must_use]
    pub fn current_package(&self) -> Option<String> {
        self.selection().package_id.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> InstallState {
        self.bus.current()
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<InstallEventBus> {
        &self.bus
    }
}

struct AttemptGuard<'a>(&'a AtomicBool);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
