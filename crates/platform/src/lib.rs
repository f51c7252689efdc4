#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Platform abstraction layer for the OS package installer.
//!
//! This crate defines the collaborators the install pipeline talks to:
//! - Install sessions (create, stream entries, commit or abandon)
//! - Installed-package lookup
//! - Manifest parsing for package identity and icon
//!
//! The `adb` backend implements all three against a connected Android
//! device, using the platform tools through [`process::PlatformCommand`].

pub mod implementations;
pub mod installer;
pub mod manifest;
pub mod process;
pub mod query;

pub use implementations::adb::{AaptManifestParser, AdbInstaller, AdbPackageQuery, AdbTarget};
pub use installer::{
    CommitCallback, InstallMode, InstallSession, InstallerService, SessionParams, SessionWriter,
};
pub use manifest::{IconResource, ManifestParser, ParsedManifest};
pub use process::{CommandOutput, PlatformCommand};
pub use query::PackageQuery;
