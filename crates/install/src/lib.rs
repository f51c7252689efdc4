#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Package analysis and installation for sideload
//!
//! This crate ties the archive reader, the platform installer and the
//! install state machine together:
//! - [`PackageAnalyzer`] extracts a representative package and describes it
//! - [`SessionPipeline`] streams every package of a source into an install
//!   session and commits it
//! - [`CommitStatusReceiver`] feeds the installer's verdict back into the bus
//! - [`InstallerController`] is the user-action facade over all of them

mod analyzer;
mod config;
mod controller;
mod metadata;
mod pipeline;
mod receiver;

pub use analyzer::{AnalysisReport, PackageAnalyzer};
pub use config::PipelineConfig;
pub use controller::{InstallerController, PARSE_FAILURE_MESSAGE};
pub use metadata::{metadata_from_manifest, rasterize, MetadataExtractor};
pub use pipeline::SessionPipeline;
pub use receiver::CommitStatusReceiver;
