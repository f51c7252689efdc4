//! Command line interface definition

use clap::{Parser, Subcommand};
use sideload_types::ColorChoice;
use std::path::PathBuf;

/// sideload - Install Android APKs and split-APK bundles
#[derive(Parser)]
#[command(name = "sideload")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install Android APKs and split-APK bundles over adb")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging to the sideload log directory
    #[arg(long, global = true)]
    pub debug: bool,

    /// Color output control
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorChoice>,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Target device serial (as listed by `adb devices`)
    #[arg(long, short = 's', global = true, value_name = "SERIAL")]
    pub serial: Option<String>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show package identity without installing
    #[command(alias = "info")]
    Inspect {
        /// APK or .xapk/.apks/.zip bundle, or `-` for standard input
        file: PathBuf,
    },

    /// Install an APK or split-APK bundle on the device
    #[command(alias = "i")]
    Install {
        /// APK or .xapk/.apks/.zip bundle, or `-` for standard input
        file: PathBuf,

        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

impl Commands {
    /// The source file named by the command
    pub fn file(&self) -> &PathBuf {
        match self {
            Commands::Inspect { file } | Commands::Install { file, .. } => file,
        }
    }
}
