//! sideload - Install Android APKs and split-APK bundles
//!
//! This is the CLI front-end. It wires the adb backend into the installer
//! controller, drives one source from analysis to the installer's verdict,
//! and renders the install states published on the event bus.

mod cli;
mod display;
mod error;
mod events;
mod setup;

use crate::cli::{Cli, Commands, GlobalArgs};
use crate::display::OutputRenderer;
use crate::error::CliError;
use crate::events::EventHandler;
use clap::Parser;
use console::Term;
use sideload_config::Config;
use sideload_install::InstallerController;
use sideload_types::{ColorChoice, InstallState, PackageMetadata};
use std::process;
use tokio::select;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments first to check for JSON mode
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    init_tracing(json_mode, cli.global.debug);

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        if json_mode {
            println!("{}", serde_json::json!({ "status": "error", "message": e.to_string() }));
        } else {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting sideload v{}", env!("CARGO_PKG_VERSION"));

    // Precedence: defaults < file < environment < flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, &cli.global);
    config.validate()?;

    let colors_enabled = match cli.global.color.unwrap_or(config.general.color) {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => Term::stdout().features().colors_supported(),
    };
    let renderer = OutputRenderer::new(cli.global.json, colors_enabled);
    let mut handler = EventHandler::new(colors_enabled, cli.global.json);

    let controller = setup::build_controller(&config);
    let source = setup::open_source(cli.command.file()).await?;
    let source_name = source.display_name();

    let state = controller.select_source(source).await?;
    let (meta, is_update) = match state {
        InstallState::ReadyToInstall { meta, is_update } => (meta, is_update),
        InstallState::Error { message } => return Err(CliError::Failed(message)),
        other => return Err(CliError::Failed(format!("unexpected state {other}"))),
    };

    match cli.command {
        Commands::Inspect { .. } => {
            renderer.render_package(&source_name, &meta, is_update)?;
        }
        Commands::Install { yes, .. } => {
            if !cli.global.json {
                renderer.render_package(&source_name, &meta, is_update)?;
            }
            if !yes {
                confirm(&meta, is_update, cli.global.json)?;
            }
            let outcome = install(&controller, &mut handler).await?;
            renderer.render_outcome(Some(&meta), &outcome)?;
            if let InstallState::Error { message } = outcome {
                return Err(CliError::Failed(message));
            }
        }
    }

    info!("Command completed successfully");
    Ok(())
}

/// Confirm the install and follow the bus until the installer decides
async fn install(
    controller: &InstallerController,
    handler: &mut EventHandler,
) -> Result<InstallState, CliError> {
    let mut subscription = controller.subscribe();
    let mut confirm = Box::pin(controller.confirm_install());
    let mut confirmed = false;

    loop {
        select! {
            result = &mut confirm, if !confirmed => {
                result?;
                confirmed = true;
            }
            state = handler.follow(&mut subscription) => {
                // Drive the pipeline to completion before returning
                if !confirmed {
                    (&mut confirm).await?;
                }
                return Ok(state.unwrap_or_else(|| controller.state()));
            }
        }
    }
}

/// Ask the user before touching the device
fn confirm(meta: &PackageMetadata, is_update: bool, json_mode: bool) -> Result<(), CliError> {
    let term = Term::stderr();
    if json_mode || !term.is_term() {
        return Err(CliError::InvalidArguments(
            "confirmation needed; pass --yes to install non-interactively".to_string(),
        ));
    }

    let verb = if is_update { "Update" } else { "Install" };
    term.write_str(&format!(
        "{verb} {} {} ({})? [y/N] ",
        meta.label, meta.version_name, meta.package_id
    ))?;
    let answer = term.read_line()?;
    if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
        Ok(())
    } else {
        Err(CliError::Declined)
    }
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, global: &GlobalArgs) {
    if let Some(color) = global.color {
        config.general.color = color;
    }
    if let Some(serial) = &global.serial {
        config.adb.serial = Some(serial.clone());
    }
}

/// Directory for debug log files
fn log_dir() -> std::path::PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("sideload")
        .join("logs")
}

/// Initialize tracing/logging
fn init_tracing(json_mode: bool, debug_enabled_flag: bool) {
    // Check if debug logging is enabled
    let debug_enabled = std::env::var("RUST_LOG").is_ok() || debug_enabled_flag;
    let debug_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sideload=debug"))
    };

    if json_mode {
        // JSON mode: suppress all console output to avoid contaminating JSON
        if debug_enabled {
            let log_dir = log_dir();
            if std::fs::create_dir_all(&log_dir).is_ok() {
                let log_file = log_dir.join(format!(
                    "sideload-{}.log",
                    chrono::Utc::now().format("%Y%m%d-%H%M%S")
                ));

                if let Ok(file) = std::fs::File::create(&log_file) {
                    tracing_subscriber::fmt()
                        .json()
                        .with_writer(file)
                        .with_env_filter(debug_filter())
                        .init();
                    return;
                }
            }
        }
        // Fallback: disable all logging in JSON mode
        tracing_subscriber::fmt()
            .with_writer(std::io::sink)
            .with_env_filter("off")
            .init();
    } else if debug_enabled {
        // Debug mode: structured JSON logs to file
        let log_dir = log_dir();
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!("Warning: Failed to create log directory: {e}");
        }

        let log_file = log_dir.join(format!(
            "sideload-{}.log",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        ));

        match std::fs::File::create(&log_file) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .json()
                    .with_writer(file)
                    .with_env_filter(debug_filter())
                    .init();

                eprintln!("Debug logging enabled: {}", log_file.display());
            }
            Err(e) => {
                eprintln!("Warning: Failed to create log file: {e}");
                // Fallback to stderr
                tracing_subscriber::fmt()
                    .with_writer(std::io::stderr)
                    .with_env_filter(debug_filter())
                    .init();
            }
        }
    } else {
        // Normal mode: minimal logging to stderr
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .without_time()
            .init();
    }
}
