//! Install sessions driven through `adb shell pm install-*`

use std::io::{self, Write};
use std::process::{Child, ChildStdin};
use std::sync::Arc;

use sideload_errors::{Error, InstallError};
use sideload_types::{FailureKind, SessionId, StatusReport};
use tracing::{debug, info, warn};

use super::{classify_pm_failure, is_pm_success, parse_session_id, AdbTarget};
use crate::installer::{CommitCallback, InstallSession, InstallerService, SessionParams, SessionWriter};
use crate::process::CommandOutput;

/// Package installer of the device addressed by an [`AdbTarget`]
#[derive(Debug, Clone)]
pub struct AdbInstaller {
    target: AdbTarget,
}

impl AdbInstaller {
    #[must_use]
    pub fn new(target: AdbTarget) -> Self {
        Self { target }
    }
}

impl InstallerService for AdbInstaller {
    fn create_session(&self, params: &SessionParams) -> Result<SessionId, Error> {
        let mut args = vec!["pm".to_string(), "install-create".to_string()];
        if let Some(size) = params.size_bytes {
            args.push("-S".to_string());
            args.push(size.to_string());
        }
        let output = self.target.shell(args).output()?;
        let message = output.combined_message();
        if !output.success() || !is_pm_success(&message) {
            return Err(InstallError::SessionCreateFailure {
                operation: "create".to_string(),
                message,
            }
            .into());
        }
        let id = SessionId(parse_session_id(&message)?);
        info!(session_id = %id, "created install session");
        Ok(id)
    }

    fn open_session(&self, session_id: SessionId) -> Result<Box<dyn InstallSession>, Error> {
        Ok(Box::new(AdbSession {
            target: self.target.clone(),
            session_id,
        }))
    }
}

/// Handle to a session on the device. `pm` keeps the session itself, so
/// dropping the handle neither commits nor abandons it.
#[derive(Debug)]
pub struct AdbSession {
    target: AdbTarget,
    session_id: SessionId,
}

impl InstallSession for AdbSession {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn open_write(
        &mut self,
        name: &str,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn SessionWriter>, Error> {
        if offset != 0 || name.contains('/') {
            return Err(InstallError::SessionWriteFailure {
                entry: name.to_string(),
                message: format!("unsupported entry name or offset {offset}"),
            }
            .into());
        }
        let cmd = self.target.exec_in([
            "cmd".to_string(),
            "package".to_string(),
            "install-write".to_string(),
            "-S".to_string(),
            length.to_string(),
            self.session_id.to_string(),
            name.to_string(),
            "-".to_string(),
        ]);
        let mut child = cmd.spawn_piped()?;
        let stdin = child.stdin.take();
        debug!(session_id = %self.session_id, entry = name, bytes = length, "opened session entry");
        Ok(Box::new(AdbSessionWriter {
            entry: name.to_string(),
            declared: length,
            written: 0,
            child: Some(child),
            stdin,
        }))
    }

    fn commit(&mut self, callback: Arc<dyn CommitCallback>) -> Result<(), Error> {
        let session_id = self.session_id;
        let cmd = self
            .target
            .shell(["pm".to_string(), "install-commit".to_string(), session_id.to_string()]);

        std::thread::Builder::new()
            .name(format!("adb-commit-{session_id}"))
            .spawn(move || {
                let report = match cmd.output() {
                    Ok(output) => commit_report(session_id, &output),
                    Err(err) => StatusReport::failure(
                        session_id,
                        FailureKind::Generic,
                        Some(err.to_string()),
                    ),
                };
                callback.on_status(report);
            })
            .map_err(|e| InstallError::CommitFailure {
                session_id: session_id.0,
                message: e.to_string(),
            })?;

        info!(session_id = %session_id, "committed install session");
        Ok(())
    }

    fn abandon(&mut self) -> Result<(), Error> {
        let output = self
            .target
            .shell([
                "pm".to_string(),
                "install-abandon".to_string(),
                self.session_id.to_string(),
            ])
            .output()?;
        let message = output.combined_message();
        if output.success() && is_pm_success(&message) {
            info!(session_id = %self.session_id, "abandoned install session");
            Ok(())
        } else {
            Err(InstallError::AbandonFailure {
                session_id: self.session_id.0,
                message,
            }
            .into())
        }
    }
}

/// Translate `pm install-commit` output into a status report
#[must_use]
pub fn commit_report(session_id: SessionId, output: &CommandOutput) -> StatusReport {
    let message = output.combined_message();
    if output.success() && is_pm_success(&message) {
        StatusReport::success(session_id)
    } else {
        let kind = classify_pm_failure(&message);
        let message = (!message.is_empty()).then_some(message);
        StatusReport::failure(session_id, kind, message)
    }
}

/// Streams one entry into `cmd package install-write` over stdin
#[derive(Debug)]
pub struct AdbSessionWriter {
    entry: String,
    declared: u64,
    written: u64,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl AdbSessionWriter {
    fn write_failure(&self, message: impl Into<String>) -> Error {
        InstallError::SessionWriteFailure {
            entry: self.entry.clone(),
            message: message.into(),
        }
        .into()
    }

    fn finish(&mut self) -> Result<(), Error> {
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child
            .wait_with_output()
            .map_err(|e| self.write_failure(e.to_string()))?;
        let output = CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        };
        let message = output.combined_message();
        if !output.success() || !is_pm_success(&message) {
            return Err(self.write_failure(message));
        }
        if self.written != self.declared {
            return Err(self.write_failure(format!(
                "wrote {} of {} declared bytes",
                self.written, self.declared
            )));
        }
        debug!(entry = %self.entry, bytes = self.written, "session entry accepted");
        Ok(())
    }
}

impl Write for AdbSessionWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "session entry closed"))?;
        let n = stdin.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl SessionWriter for AdbSessionWriter {
    fn fsync(&mut self) -> Result<(), Error> {
        self.flush().map_err(|e| self.write_failure(e.to_string()))?;
        // install-write only reports once its input is closed
        self.finish()
    }

    fn close(&mut self) -> Result<(), Error> {
        self.finish()
    }
}

impl Drop for AdbSessionWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            warn!(entry = %self.entry, "session entry dropped before completion");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
