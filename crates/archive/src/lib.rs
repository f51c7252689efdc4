#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Package source handling for sideload
//!
//! This crate reads installable packages out of whatever the user selected:
//! a single APK, or a split-APK bundle (`.apks`, `.xapk`, plain `.zip`). It
//! provides:
//! - [`PackageSource`] for re-openable byte sources
//! - [`ZipStream`], a forward-only ZIP reader that handles data-descriptor
//!   entries of unknown size
//! - [`ProgressReader`], which reports bytes consumed as install progress
//! - layout probing and representative-package extraction for analysis

pub mod inspector;
pub mod progress;
pub mod source;
pub mod stream;

pub use inspector::{
    extract_representative, is_package_entry, probe_layout, ExtractedFrom, ExtractedPackage,
    SourceLayout,
};
pub use progress::ProgressReader;
pub use source::{FileSource, MemorySource, PackageSource};
pub use stream::{Compression, EntryHeader, ZipEntry, ZipStream};
