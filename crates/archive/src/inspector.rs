//! Format probing and representative-package extraction
//!
//! Every APK is itself a ZIP, so "is this a ZIP" is not enough to tell a
//! bundle from a single package. A ZIP with a root `AndroidManifest.xml` is
//! a bare APK, whatever `.apk` assets it embeds. Otherwise a ZIP holding
//! `.apk` entries is a bundle. Anything that fails to parse as a ZIP is
//! treated as a raw package and left to the manifest parser to accept or
//! reject.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use sideload_errors::{ArchiveError, Error, InstallError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::source::PackageSource;
use crate::stream::ZipStream;

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

/// How a source should be written into an install session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayout {
    /// ZIP container whose `.apk` entries are the session entries
    Bundle,
    /// The whole source is one package
    SinglePackage,
}

/// Whether a ZIP entry name denotes an installable package
#[must_use]
pub fn is_package_entry(name: &str) -> bool {
    !name.ends_with('/') && name.to_ascii_lowercase().ends_with(".apk")
}

fn is_base_entry(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with("base.apk")
}

fn source_unreadable(source: &dyn PackageSource, err: &io::Error) -> Error {
    InstallError::SourceUnreadable {
        origin: source.display_name(),
        message: err.to_string(),
    }
    .into()
}

fn open_source(source: &dyn PackageSource) -> Result<Box<dyn Read + Send>, Error> {
    source.open().map_err(|e| source_unreadable(source, &e))
}

/// Decide how `source` is laid out, reading no further than needed.
///
/// # Errors
///
/// Returns `SourceUnreadable` if the source cannot be opened or fails while
/// being read. Malformed ZIP data is not an error here; it makes the source
/// a single package.
pub fn probe_layout(source: &dyn PackageSource) -> Result<SourceLayout, Error> {
    let mut zip = ZipStream::new(open_source(source)?);
    let mut saw_package = false;

    let layout = loop {
        match zip.next_entry() {
            Ok(Some(entry)) => {
                if entry.name() == MANIFEST_ENTRY {
                    break SourceLayout::SinglePackage;
                }
                if is_package_entry(entry.name()) {
                    // Same point at which extraction settles on its entry
                    if is_base_entry(entry.name()) {
                        break SourceLayout::Bundle;
                    }
                    saw_package = true;
                }
            }
            // A ZIP without a manifest is a bundle, possibly with nothing to install
            Ok(None) => break SourceLayout::Bundle,
            Err(err) if err.is_structural() && saw_package => {
                debug!(
                    source = %source.display_name(),
                    error = %err,
                    "bundle damaged after a package entry"
                );
                break SourceLayout::Bundle;
            }
            Err(err) if err.is_structural() => {
                debug!(source = %source.display_name(), error = %err, "not a zip stream");
                break SourceLayout::SinglePackage;
            }
            Err(err) => {
                return Err(InstallError::SourceUnreadable {
                    origin: source.display_name(),
                    message: err.to_string(),
                }
                .into())
            }
        }
    };

    debug!(source = %source.display_name(), ?layout, "probed source layout");
    Ok(layout)
}

/// Where an [`ExtractedPackage`] came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedFrom {
    /// A named entry of a bundle
    Entry(String),
    /// The source itself
    WholeSource,
}

/// A package copied to an exclusively owned temporary file, deleted on drop
#[derive(Debug)]
pub struct ExtractedPackage {
    file: NamedTempFile,
    origin: ExtractedFrom,
    len: u64,
}

impl ExtractedPackage {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    #[must_use]
    pub fn origin(&self) -> &ExtractedFrom {
        &self.origin
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

fn copy_into(reader: &mut dyn Read, file: &mut File) -> Result<u64, CopyError> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        file.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
    file.flush().map_err(CopyError::Write)?;
    Ok(total)
}

fn scratch_file(scratch_dir: &Path) -> Result<NamedTempFile, Error> {
    tempfile::Builder::new()
        .prefix("sideload-")
        .suffix(".apk")
        .tempfile_in(scratch_dir)
        .map_err(|e| Error::io_with_path(&e, scratch_dir))
}

/// Result of copying one bundle entry
enum EntryCopy {
    Done(u64),
    /// The archive turned out to be malformed mid-entry
    Structural(ArchiveError),
}

fn copy_entry(
    source: &dyn PackageSource,
    reader: &mut dyn Read,
    file: &mut NamedTempFile,
) -> Result<EntryCopy, Error> {
    match copy_into(reader, file.as_file_mut()) {
        Ok(len) => Ok(EntryCopy::Done(len)),
        Err(CopyError::Write(e)) => Err(Error::io_with_path(&e, file.path())),
        Err(CopyError::Read(e)) => match ArchiveError::from_io_payload(&e) {
            Some(archive) if archive.is_structural() => Ok(EntryCopy::Structural(archive)),
            _ => Err(source_unreadable(source, &e)),
        },
    }
}

/// Copy the package that represents `source` for metadata extraction.
///
/// Scans bundle entries in stream order. The first entry ending in
/// `base.apk` wins and ends the scan; otherwise the first `.apk` entry is
/// used, once the whole archive has been seen. A root `AndroidManifest.xml`
/// met before that point makes the source a bare APK. A source that is not
/// a ZIP, or a bare APK, is copied whole.
///
/// # Errors
///
/// Returns `SourceUnreadable` if the source cannot be read,
/// `NoInstallablePackageFound` for a ZIP with no package in it, and an I/O
/// error if the scratch file cannot be written.
pub fn extract_representative(
    source: &dyn PackageSource,
    scratch_dir: &Path,
) -> Result<ExtractedPackage, Error> {
    let mut zip = ZipStream::new(open_source(source)?);
    let mut candidate: Option<ExtractedPackage> = None;
    let mut structural: Option<ArchiveError> = None;

    loop {
        let mut entry = match zip.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) if err.is_structural() => {
                structural = Some(err);
                break;
            }
            Err(err) => {
                return Err(InstallError::SourceUnreadable {
                    origin: source.display_name(),
                    message: err.to_string(),
                }
                .into())
            }
        };

        let name = entry.name().to_string();
        if name == MANIFEST_ENTRY {
            debug!(source = %source.display_name(), "root manifest found, source is a bare apk");
            return copy_whole(source, scratch_dir);
        }
        if !is_package_entry(&name) {
            continue;
        }
        let is_base = is_base_entry(&name);
        if candidate.is_some() && !is_base {
            continue;
        }

        let mut file = scratch_file(scratch_dir)?;
        match copy_entry(source, &mut entry, &mut file)? {
            EntryCopy::Done(len) => {
                debug!(entry = %name, bytes = len, "copied candidate package");
                candidate = Some(ExtractedPackage {
                    file,
                    origin: ExtractedFrom::Entry(name),
                    len,
                });
                if is_base {
                    break;
                }
            }
            EntryCopy::Structural(err) => {
                structural = Some(err);
                break;
            }
        }
    }

    if let Some(package) = candidate {
        if let Some(err) = &structural {
            warn!(error = %err, "archive damaged after the selected package");
        }
        info!(source = %source.display_name(), from = ?package.origin, "extracted package");
        return Ok(package);
    }

    if let Some(err) = structural {
        debug!(error = %err, "source is not a zip stream, using it whole");
        return copy_whole(source, scratch_dir);
    }

    Err(InstallError::NoInstallablePackageFound {
        origin: source.display_name(),
    }
    .into())
}

fn copy_whole(source: &dyn PackageSource, scratch_dir: &Path) -> Result<ExtractedPackage, Error> {
    let mut reader = open_source(source)?;
    let mut file = scratch_file(scratch_dir)?;
    let len = match copy_into(&mut reader, file.as_file_mut()) {
        Ok(len) => len,
        Err(CopyError::Read(e)) => return Err(source_unreadable(source, &e)),
        Err(CopyError::Write(e)) => return Err(Error::io_with_path(&e, file.path())),
    };
    info!(source = %source.display_name(), bytes = len, "extracted whole source");
    Ok(ExtractedPackage {
        file,
        origin: ExtractedFrom::WholeSource,
        len,
    })
}
