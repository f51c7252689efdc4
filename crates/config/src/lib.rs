#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for sideload
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/sideload/config.toml)
//! - Environment variables
//! - CLI flags (applied by the binary on top of the merged result)

use serde::{Deserialize, Serialize};
use sideload_errors::{ConfigError, Error};
use sideload_types::ColorChoice;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub install: InstallConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub adb: AdbConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_color_choice")]
    pub color: ColorChoice,
}

/// Session pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Copy buffer size for session writes, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Where unknown-size entries are buffered (system temp dir if unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Session entry name used for single-package sources
    #[serde(default = "default_session_name")]
    pub session_name: String,
}

/// Install event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Number of past states replayed to a new subscriber
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    /// Live states buffered per subscriber before it starts skipping
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Android debug bridge backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbConfig {
    #[serde(default = "default_adb_path")]
    pub adb_path: PathBuf,
    #[serde(default = "default_aapt_path")]
    pub aapt_path: PathBuf,
    /// Target device serial; the only attached device if unset
    #[serde(default)]
    pub serial: Option<String>,
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            color: ColorChoice::Auto,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            scratch_dir: None,
            session_name: default_session_name(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            replay_capacity: default_replay_capacity(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            aapt_path: default_aapt_path(),
            serial: None,
        }
    }
}

// Default value functions for serde
fn default_color_choice() -> ColorChoice {
    ColorChoice::Auto
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_session_name() -> String {
    "base.apk".to_string()
}

fn default_replay_capacity() -> usize {
    1
}

fn default_channel_capacity() -> usize {
    256
}

fn default_adb_path() -> PathBuf {
    PathBuf::from("adb")
}

fn default_aapt_path() -> PathBuf {
    PathBuf::from("aapt")
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("sideload").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        debug!(path = %path.display(), "loaded configuration file");
        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// If path is provided, loads from that file.
    /// If path is None, uses the default loading behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // SIDELOAD_CHUNK_SIZE
        if let Ok(size) = std::env::var("SIDELOAD_CHUNK_SIZE") {
            self.install.chunk_size = size.parse().map_err(|_| ConfigError::InvalidValue {
                field: "SIDELOAD_CHUNK_SIZE".to_string(),
                value: size,
            })?;
        }

        // SIDELOAD_SCRATCH_DIR
        if let Ok(dir) = std::env::var("SIDELOAD_SCRATCH_DIR") {
            if dir.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "SIDELOAD_SCRATCH_DIR".to_string(),
                    value: dir,
                }
                .into());
            }
            self.install.scratch_dir = Some(PathBuf::from(dir));
        }

        // SIDELOAD_ADB
        if let Ok(adb) = std::env::var("SIDELOAD_ADB") {
            self.adb.adb_path = PathBuf::from(adb);
        }

        // SIDELOAD_AAPT
        if let Ok(aapt) = std::env::var("SIDELOAD_AAPT") {
            self.adb.aapt_path = PathBuf::from(aapt);
        }

        // SIDELOAD_SERIAL
        if let Ok(serial) = std::env::var("SIDELOAD_SERIAL") {
            self.adb.serial = (!serial.is_empty()).then_some(serial);
        }

        // SIDELOAD_COLOR
        if let Ok(color) = std::env::var("SIDELOAD_COLOR") {
            self.general.color = match color.as_str() {
                "always" => ColorChoice::Always,
                "auto" => ColorChoice::Auto,
                "never" => ColorChoice::Never,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "SIDELOAD_COLOR".to_string(),
                        value: color,
                    }
                    .into())
                }
            };
        }

        Ok(())
    }

    /// Check values that deserialize fine but cannot drive an install
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a zero chunk size or a zero
    /// replay capacity, and `ConfigError::Invalid` for an empty session name.
    pub fn validate(&self) -> Result<(), Error> {
        if self.install.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "install.chunk_size".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        if self.events.replay_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "events.replay_capacity".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        if self.install.session_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "install.session_name must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Get the scratch directory (with default)
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.install
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
