//! Install session pipeline
//!
//! Streams every installable package of a source into one OS install
//! session, reporting progress as source bytes are consumed, then commits
//! the session. The pipeline is synchronous and runs on a blocking worker;
//! everything it publishes goes through the ordered queue.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use sideload_archive::{
    is_package_entry, probe_layout, PackageSource, ProgressReader, SourceLayout, ZipStream,
};
use sideload_errors::{ArchiveError, Error, InstallError, UserFacingError};
use sideload_events::{EventEmitter, EventSender, Transition};
use sideload_platform::{CommitCallback, InstallSession, InstallerService, SessionParams};
use sideload_types::SessionId;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;

type SourceReader = ProgressReader<Box<dyn Read + Send>, EventSender>;

/// Writes a source into an install session and commits it
pub struct SessionPipeline {
    installer: Arc<dyn InstallerService>,
    config: PipelineConfig,
}

impl SessionPipeline {
    #[must_use]
    pub fn new(installer: Arc<dyn InstallerService>, config: PipelineConfig) -> Self {
        Self { installer, config }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one install attempt for `source`.
    ///
    /// The bus is expected to be in `Parsing` (the controller applies
    /// `InstallConfirmed` first). On success the session has been committed
    /// and `callback` will receive the installer's verdict; on failure the
    /// session has been abandoned and a `Failed` transition queued.
    ///
    /// Blocks the calling thread, including on [`EventEmitter::flush`].
    ///
    /// # Errors
    ///
    /// Returns the cause of the failure after it has been published.
    pub fn run(
        &self,
        source: &dyn PackageSource,
        events: &EventSender,
        callback: Arc<dyn CommitCallback>,
    ) -> Result<SessionId, Error> {
        let total = source.size_hint();
        let params = SessionParams::full_install(total);

        let mut session = match self
            .installer
            .create_session(&params)
            .and_then(|id| self.installer.open_session(id))
        {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    source = %source.display_name(),
                    error = %err,
                    "could not open install session"
                );
                events.emit_failed(err.user_message());
                return Err(err);
            }
        };
        let session_id = session.session_id();
        info!(
            %session_id,
            source = %source.display_name(),
            total_bytes = ?total,
            "install session opened"
        );

        let result = self.write_and_commit(source, total, session.as_mut(), events, callback);
        if let Err(err) = &result {
            warn!(%session_id, error = %err, "install attempt failed, abandoning session");
            if let Err(abandon_err) = session.abandon() {
                warn!(%session_id, error = %abandon_err, "failed to abandon session");
            }
            events.emit_failed(err.user_message());
        }
        session.close();
        result.map(|()| session_id)
    }

    fn write_and_commit(
        &self,
        source: &dyn PackageSource,
        total: Option<u64>,
        session: &mut dyn InstallSession,
        events: &EventSender,
        callback: Arc<dyn CommitCallback>,
    ) -> Result<(), Error> {
        let layout = probe_layout(source)?;
        let stream = source.open().map_err(|e| source_unreadable(source, &e))?;
        let mut reader = ProgressReader::new(stream, total, events.clone());
        events.emit(Transition::WriteStarted);

        let mut writer = EntryWriter {
            source,
            session: &mut *session,
            config: &self.config,
            buf: vec![0u8; self.config.chunk_size.max(1)],
            names: EntryNames::default(),
            written: 0,
        };
        match layout {
            SourceLayout::Bundle => writer.write_bundle(&mut reader)?,
            SourceLayout::SinglePackage => {
                let name = writer.names.assign(&self.config.session_name);
                writer.write_stream(&name, total, &mut reader)?;
            }
        }

        if writer.written == 0 {
            return Err(InstallError::NoPackageFilesWritten {
                origin: source.display_name(),
            }
            .into());
        }
        let written = writer.written;
        debug!(
            entries = written,
            bytes = reader.bytes_processed(),
            "session entries written"
        );

        // Covers sources of unknown length, which never reported progress
        events.emit_progress(1.0);
        events.flush();

        let session_id = session.session_id();
        session.commit(callback).map_err(|err| {
            Error::from(InstallError::CommitFailure {
                session_id: session_id.0,
                message: err.user_message().into_owned(),
            })
        })?;
        info!(%session_id, entries = written, "install session committed");
        Ok(())
    }
}

/// Per-attempt write state
struct EntryWriter<'a> {
    source: &'a dyn PackageSource,
    session: &'a mut dyn InstallSession,
    config: &'a PipelineConfig,
    buf: Vec<u8>,
    names: EntryNames,
    written: usize,
}

impl EntryWriter<'_> {
    fn write_bundle(&mut self, reader: &mut SourceReader) -> Result<(), Error> {
        let mut zip = ZipStream::new(reader);
        loop {
            let mut entry = match zip.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => return Ok(()),
                Err(err) => return Err(archive_failure(self.source, err)),
            };
            if !is_package_entry(entry.name()) {
                debug!(entry = entry.name(), "skipping non-package entry");
                continue;
            }
            let name = self.names.assign(entry.name());
            let size = entry.size();
            self.write_stream(&name, size, &mut entry)?;
        }
    }

    /// Write one session entry, buffering it first when `size` is unknown
    fn write_stream(
        &mut self,
        name: &str,
        size: Option<u64>,
        reader: &mut dyn Read,
    ) -> Result<(), Error> {
        let source = self.source;
        let from_source = |e: &io::Error| read_failure(source, e);
        match size {
            Some(size) => self.write_entry(name, size, reader, &from_source),
            None => self.write_buffered(name, reader),
        }
    }

    fn write_buffered(&mut self, name: &str, reader: &mut dyn Read) -> Result<(), Error> {
        let scratch_dir = self.config.scratch_dir.clone();
        let mut scratch = tempfile::Builder::new()
            .prefix("sideload-")
            .suffix(".part")
            .tempfile_in(&scratch_dir)
            .map_err(|e| Error::io_with_path(&e, &scratch_dir))?;

        let len = match copy_chunks(reader, scratch.as_file_mut(), &mut self.buf) {
            Ok(len) => len,
            Err(CopyError::Read(e)) => return Err(read_failure(self.source, &e)),
            Err(CopyError::Write(e)) => return Err(Error::io_with_path(&e, scratch.path())),
        };
        debug!(entry = name, bytes = len, "buffered entry of unknown size");

        let path = scratch.path().to_path_buf();
        let file = scratch.as_file_mut();
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io_with_path(&e, &path))?;
        // `scratch` is removed when it drops, on every path
        let from_scratch = |e: &io::Error| Error::io_with_path(e, &path);
        self.write_entry(name, len, file, &from_scratch)
    }

    fn write_entry(
        &mut self,
        name: &str,
        size: u64,
        reader: &mut dyn Read,
        on_read_error: &dyn Fn(&io::Error) -> Error,
    ) -> Result<(), Error> {
        let mut writer = self.session.open_write(name, 0, size)?;
        let copied = match copy_chunks(reader, &mut writer, &mut self.buf) {
            Ok(copied) => copied,
            Err(CopyError::Read(e)) => return Err(on_read_error(&e)),
            Err(CopyError::Write(e)) => return Err(write_failure(name, e.to_string())),
        };
        if copied != size {
            return Err(write_failure(
                name,
                format!("source yielded {copied} of {size} declared bytes"),
            ));
        }
        writer.fsync()?;
        writer.close()?;
        self.written += 1;
        debug!(entry = name, bytes = size, "wrote session entry");
        Ok(())
    }
}

/// Session entry names: final path component, unique within the session
#[derive(Default)]
struct EntryNames {
    seen: HashMap<String, usize>,
}

impl EntryNames {
    fn assign(&mut self, entry_name: &str) -> String {
        let base = entry_name.rsplit('/').next().unwrap_or(entry_name).to_string();
        let count = self.seen.entry(base.to_ascii_lowercase()).or_insert(0);
        *count += 1;
        if *count == 1 {
            return base;
        }
        let unique = match base.rfind('.') {
            Some(dot) => format!("{}_{}{}", &base[..dot], count, &base[dot..]),
            None => format!("{base}_{count}"),
        };
        // A generated name may itself collide with a later literal entry
        self.seen.entry(unique.to_ascii_lowercase()).or_insert(1);
        unique
    }
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

fn copy_chunks(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    buf: &mut [u8],
) -> Result<u64, CopyError> {
    let mut total = 0u64;
    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok(total)
}

fn source_unreadable(source: &dyn PackageSource, err: &io::Error) -> Error {
    InstallError::SourceUnreadable {
        origin: source.display_name(),
        message: err.to_string(),
    }
    .into()
}

fn archive_failure(source: &dyn PackageSource, err: ArchiveError) -> Error {
    if err.is_structural() {
        InstallError::UnsupportedOrCorruptArchive {
            origin: source.display_name(),
            message: err.to_string(),
        }
        .into()
    } else {
        InstallError::SourceUnreadable {
            origin: source.display_name(),
            message: err.to_string(),
        }
        .into()
    }
}

fn read_failure(source: &dyn PackageSource, err: &io::Error) -> Error {
    match ArchiveError::from_io_payload(err) {
        Some(archive) => archive_failure(source, archive),
        None => source_unreadable(source, err),
    }
}

fn write_failure(entry: &str, message: String) -> Error {
    InstallError::SessionWriteFailure {
        entry: entry.to_string(),
        message,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::EntryNames;

    #[test]
    fn entry_names_use_final_component() {
        let mut names = EntryNames::default();
        assert_eq!(names.assign("splits/config.arm64_v8a.apk"), "config.arm64_v8a.apk");
        assert_eq!(names.assign("base.apk"), "base.apk");
    }

    #[test]
    fn duplicate_names_get_numeric_suffix() {
        let mut names = EntryNames::default();
        assert_eq!(names.assign("a/split.apk"), "split.apk");
        assert_eq!(names.assign("b/split.apk"), "split_2.apk");
        assert_eq!(names.assign("c/SPLIT.apk"), "SPLIT_3.apk");
        assert_eq!(names.assign("split_2.apk"), "split_2_2.apk");
    }
}
