//! OS package installer abstraction
//!
//! An install session is write-once-then-commit: named entries are streamed
//! in with a declared length, each one synced, then the whole session is
//! committed or abandoned. The outcome of a commit arrives later, on any
//! thread, through a [`CommitCallback`].

use std::io::Write;
use std::sync::Arc;

use sideload_errors::Error;
use sideload_types::{SessionId, StatusReport};

/// How the new session relates to an existing installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    /// The session replaces every split of the target package
    #[default]
    FullInstall,
}

/// Parameters for a new install session
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    pub mode: InstallMode,
    /// Total bytes expected across all entries, when known up front
    pub size_bytes: Option<u64>,
}

impl SessionParams {
    #[must_use]
    pub fn full_install(size_bytes: Option<u64>) -> Self {
        Self {
            mode: InstallMode::FullInstall,
            size_bytes,
        }
    }
}

/// Receives the asynchronous result of [`InstallSession::commit`]
pub trait CommitCallback: Send + Sync {
    /// May be called from any thread, possibly more than once per session
    /// (a confirmation request followed by the final outcome).
    fn on_status(&self, report: StatusReport);
}

/// Creates and reopens install sessions
pub trait InstallerService: Send + Sync {
    /// Create a new session
    ///
    /// # Errors
    ///
    /// Returns an error if the installer refuses to create the session.
    fn create_session(&self, params: &SessionParams) -> Result<SessionId, Error>;

    /// Open a previously created session for writing
    ///
    /// # Errors
    ///
    /// Returns an error if the session does not exist or cannot be opened.
    fn open_session(&self, session_id: SessionId) -> Result<Box<dyn InstallSession>, Error>;
}

/// One open install session, exclusively owned by a single attempt
pub trait InstallSession: Send {
    fn session_id(&self) -> SessionId;

    /// Open a named entry that will receive exactly `length` bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the entry name is rejected or the write channel
    /// cannot be opened.
    fn open_write(
        &mut self,
        name: &str,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn SessionWriter>, Error>;

    /// Hand the session to the installer; the outcome is reported to
    /// `callback`
    ///
    /// # Errors
    ///
    /// Returns an error if the commit request itself could not be issued.
    fn commit(&mut self, callback: Arc<dyn CommitCallback>) -> Result<(), Error>;

    /// Discard the session and everything written into it
    ///
    /// # Errors
    ///
    /// Returns an error if the installer could not be told to drop it.
    fn abandon(&mut self) -> Result<(), Error>;

    /// Release the local handle. Does not affect a pending commit.
    fn close(&mut self) {}
}

/// Write channel for one session entry
pub trait SessionWriter: Write + Send {
    /// Make everything written so far durable in the session
    ///
    /// # Errors
    ///
    /// Returns an error if the installer did not accept the entry.
    fn fsync(&mut self) -> Result<(), Error>;

    /// Release the write channel; safe to call after `fsync`
    ///
    /// # Errors
    ///
    /// Returns an error if finishing the channel reveals a failed write.
    fn close(&mut self) -> Result<(), Error>;
}
