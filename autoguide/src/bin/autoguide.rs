//! Autoguider daemon: watches the nightly data directory and keeps the mount
//! on target until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use autoguide::{GuideError, GuiderConfig, NightController, RunOutcome, ShutdownToken};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Command line arguments for the autoguider
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Guide the mount from images arriving in the nightly data directory"
)]
struct Args {
    /// Dry run: measure and log corrections without moving the mount
    #[arg(long)]
    debug: bool,

    /// Print the reference and check image names for every cycle
    #[arg(long = "v")]
    verbose: bool,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the YYYYMMDD night directories
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Image correlation tool
    #[arg(long)]
    offset_tool: Option<PathBuf>,

    /// Command receiving "<dx> <dy>" corrections (log only when absent)
    #[arg(long)]
    guide_command: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

/// Merge the config file (if any) with command line overrides
fn build_config(args: &Args) -> Result<GuiderConfig> {
    let mut config = match &args.config {
        Some(path) => GuiderConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GuiderConfig::default(),
    };

    if let Some(base_dir) = &args.base_dir {
        config.base_dir = base_dir.clone();
    }
    if let Some(tool) = &args.offset_tool {
        config.offset_tool.program = tool.clone();
    }
    if let Some(command) = &args.guide_command {
        config.mount.guide_command = Some(command.clone());
    }
    config.dry_run |= args.debug;
    config.verbose |= args.verbose;

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn shutdown_signal(shutdown: ShutdownToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }

    shutdown.trigger();
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    if args.print_config {
        return match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("Failed to serialize configuration: {e}");
                ExitCode::FAILURE
            }
        };
    }

    log::info!(
        "Starting autoguider on {} (dry run: {}, max correction: {} px)",
        config.base_dir.display(),
        config.dry_run,
        config.max_correction
    );

    let shutdown = ShutdownToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let controller = NightController::from_config(config).with_shutdown(shutdown);
    let result = tokio::task::spawn_blocking(move || {
        let mut controller = controller;
        controller.run()
    })
    .await;

    match result {
        Ok(Ok(RunOutcome::Shutdown)) => {
            log::info!("Shut down complete");
            ExitCode::SUCCESS
        }
        Ok(Err(e @ GuideError::NoImagesTonight { .. })) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
        Ok(Err(e)) => {
            log::error!("Guider stopped: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("Guider task panicked: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "autoguide",
            "--debug",
            "--v",
            "--base-dir",
            "/data/nights",
            "--guide-command",
            "/usr/local/bin/guide",
        ]);
        let config = build_config(&args).unwrap();
        assert!(config.dry_run);
        assert!(config.verbose);
        assert_eq!(config.base_dir, PathBuf::from("/data/nights"));
        assert_eq!(
            config.mount.guide_command,
            Some(PathBuf::from("/usr/local/bin/guide"))
        );
    }

    #[test]
    fn test_defaults_without_flags() {
        let args = Args::parse_from(["autoguide"]);
        let config = build_config(&args).unwrap();
        assert!(!config.dry_run);
        assert_eq!(config.max_correction, 15.0);
    }

    #[test]
    fn test_missing_config_file_fails() {
        let args = Args::parse_from(["autoguide", "--config", "/nonexistent/guider.json"]);
        assert!(build_config(&args).is_err());
    }
}
