//! Wiring of the adb backend, the install pipeline and the event bus

use std::path::Path;
use std::sync::Arc;

use sideload_archive::{FileSource, MemorySource, PackageSource};
use sideload_config::Config;
use sideload_errors::InstallError;
use sideload_events::InstallEventBus;
use sideload_install::{InstallerController, PackageAnalyzer, PipelineConfig, SessionPipeline};
use sideload_platform::{AaptManifestParser, AdbInstaller, AdbPackageQuery, AdbTarget};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::CliError;

/// Build a controller talking to the configured device
pub fn build_controller(config: &Config) -> InstallerController {
    let target = AdbTarget::new(&config.adb.adb_path, config.adb.serial.clone());
    let scratch_dir = config.scratch_dir();
    debug!(
        adb = %config.adb.adb_path.display(),
        aapt = %config.adb.aapt_path.display(),
        serial = ?config.adb.serial,
        scratch = %scratch_dir.display(),
        "building installer"
    );

    let analyzer = PackageAnalyzer::new(
        Arc::new(AaptManifestParser::new(&config.adb.aapt_path)),
        Arc::new(AdbPackageQuery::new(target.clone())),
        &scratch_dir,
    );
    let pipeline = SessionPipeline::new(
        Arc::new(AdbInstaller::new(target)),
        PipelineConfig::default()
            .with_chunk_size(config.install.chunk_size)
            .with_scratch_dir(scratch_dir)
            .with_session_name(config.install.session_name.clone()),
    );
    let bus = InstallEventBus::new(config.events.replay_capacity, config.events.channel_capacity);

    InstallerController::new(Arc::new(bus), Arc::new(analyzer), Arc::new(pipeline))
}

/// Resolve the FILE argument; `-` reads all of standard input
pub async fn open_source(path: &Path) -> Result<Arc<dyn PackageSource>, CliError> {
    if path.as_os_str() == "-" {
        let mut bytes = Vec::new();
        tokio::io::stdin().read_to_end(&mut bytes).await?;
        debug!(bytes = bytes.len(), "read package from standard input");
        return Ok(Arc::new(MemorySource::new("stdin", bytes)));
    }

    if !path.is_file() {
        return Err(sideload_errors::Error::from(InstallError::SourceUnreadable {
            origin: path.display().to_string(),
            message: "not a file".to_string(),
        })
        .into());
    }
    Ok(Arc::new(FileSource::new(path)))
}
