//! Process execution for the external platform tools (adb, aapt)

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use sideload_errors::PlatformError;
use tracing::debug;

/// Platform-specific command builder and execution
#[derive(Debug, Clone)]
pub struct PlatformCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl PlatformCommand {
    /// Create a new platform command
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Add an argument to the command
    pub fn arg<S: Into<OsString>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    /// Command line rendered for logs and error messages
    #[must_use]
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    /// Run to completion and capture both output streams
    ///
    /// # Errors
    ///
    /// Returns `CommandNotFound` if the program does not exist and
    /// `ProcessExecutionFailed` if it cannot be started.
    pub fn output(&self) -> Result<CommandOutput, PlatformError> {
        let program = self.program.display().to_string();
        debug!(command = %self.display(), "running platform command");
        let output = self
            .build()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| PlatformError::from_spawn(&program, &e))?;
        debug!(
            command = %program,
            exit_code = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            "platform command finished"
        );
        Ok(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Start with a piped stdin for streaming input; stdout and stderr are
    /// captured for the exit check.
    ///
    /// # Errors
    ///
    /// Same as [`PlatformCommand::output`].
    pub fn spawn_piped(&self) -> Result<Child, PlatformError> {
        let program = self.program.display().to_string();
        debug!(command = %self.display(), "spawning platform command");
        self.build()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PlatformError::from_spawn(&program, &e))
    }
}

/// Output from command execution
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    #[must_use]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Trimmed stdout, falling back to stderr when stdout is empty
    #[must_use]
    pub fn combined_message(&self) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            String::from_utf8_lossy(&self.stderr).trim().to_string()
        } else {
            stdout.to_string()
        }
    }
}
