//! Streaming archive error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    #[error("invalid record signature {found:#010x} at offset {offset}")]
    InvalidSignature { offset: u64, found: u32 },

    #[error("archive truncated while reading {context}")]
    Truncated { context: String },

    #[error("corrupt data in {entry}: {message}")]
    CorruptData { entry: String, message: String },

    #[error("unsupported compression method {method} for {entry}")]
    UnsupportedCompression { entry: String, method: u16 },

    #[error("encrypted entry not supported: {entry}")]
    Encrypted { entry: String },

    #[error("CRC mismatch for {entry}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        entry: String,
        expected: u32,
        actual: u32,
    },

    #[error("invalid data descriptor for {entry}: {message}")]
    InvalidDescriptor { entry: String, message: String },

    #[error("I/O error reading archive: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl ArchiveError {
    /// Whether this error means the bytes are not a well-formed ZIP stream,
    /// as opposed to the underlying source failing to deliver bytes.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }

    /// Wrap this error so it can be returned from a `std::io::Read` impl.
    #[must_use]
    pub fn into_io(self) -> std::io::Error {
        let kind = match &self {
            Self::Io { kind, .. } => *kind,
            Self::Truncated { .. } => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, self)
    }

    /// Recover an `ArchiveError` previously wrapped with [`ArchiveError::into_io`].
    #[must_use]
    pub fn from_io_payload(err: &std::io::Error) -> Option<Self> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<ArchiveError>())
            .cloned()
    }

    /// Classify a raw io::Error raised while parsing archive structures.
    ///
    /// A wrapped payload is returned as-is, so source failures tagged as
    /// [`ArchiveError::Io`] keep their kind. Only untagged errors, such as
    /// the end of input `read_exact` reports, are classified by kind.
    #[must_use]
    pub fn classify_io(err: &std::io::Error, context: &str) -> Self {
        if let Some(archive) = Self::from_io_payload(err) {
            return archive;
        }
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::Truncated {
                context: context.to_string(),
            },
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput => {
                Self::CorruptData {
                    entry: context.to_string(),
                    message: err.to_string(),
                }
            }
            kind => Self::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

impl UserFacingError for ArchiveError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InvalidSignature { .. } => "archive.invalid_signature",
            Self::Truncated { .. } => "archive.truncated",
            Self::CorruptData { .. } => "archive.corrupt_data",
            Self::UnsupportedCompression { .. } => "archive.unsupported_compression",
            Self::Encrypted { .. } => "archive.encrypted",
            Self::CrcMismatch { .. } => "archive.crc_mismatch",
            Self::InvalidDescriptor { .. } => "archive.invalid_descriptor",
            Self::Io { .. } => "archive.io",
        };
        Some(code)
    }
}
