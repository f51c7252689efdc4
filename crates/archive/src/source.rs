//! Package sources the installer can read from

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A re-openable byte source: a local file, a content URI, a buffer
pub trait PackageSource: Send + Sync {
    /// Open a fresh stream positioned at the start. May be called more than
    /// once per attempt.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the source cannot be opened.
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Total length in bytes if cheaply known
    fn size_hint(&self) -> Option<u64>;

    /// Human-readable name for messages and logs
    fn display_name(&self) -> String;
}

/// A file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PackageSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn size_hint(&self) -> Option<u64> {
        std::fs::metadata(&self.path)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|meta| meta.len())
    }

    fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// An in-memory source, optionally hiding its length the way a streamed
/// content provider does
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    bytes: Arc<[u8]>,
    report_size: bool,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            report_size: true,
        }
    }

    /// Make `size_hint` return `None`
    #[must_use]
    pub fn without_size_hint(mut self) -> Self {
        self.report_size = false;
        self
    }
}

impl PackageSource for MemorySource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }

    fn size_hint(&self) -> Option<u64> {
        self.report_size.then_some(self.bytes.len() as u64)
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}
