#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the sideload installer
//!
//! This crate provides the data model shared by the archive inspector, the
//! install pipeline, the event bus and every front-end: package metadata,
//! the install state sum type and the OS status classification.

pub mod package;
pub mod state;
pub mod status;

// Re-export commonly used types
pub use package::{IconBitmap, PackageMetadata, UNKNOWN};
pub use state::{InstallState, PendingUserAction};
pub use status::{FailureKind, InstallStatus, SessionId, StatusReport};

use serde::{Deserialize, Serialize};

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    Always,
    #[default]
    Auto,
    Never,
}

// Implement clap::ValueEnum for ColorChoice
impl clap::ValueEnum for ColorChoice {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Always, Self::Auto, Self::Never]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Always => clap::builder::PossibleValue::new("always"),
            Self::Auto => clap::builder::PossibleValue::new("auto"),
            Self::Never => clap::builder::PossibleValue::new("never"),
        })
    }
}
