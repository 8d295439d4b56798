//! plate-verifier - Real-time license plate verification
//!
//! Reads a live camera stream, detects and reads license plates, and checks
//! each reading against a read-only registry of known plates.

mod analysis;
mod app;
mod capture;
mod config;
mod hotkey;
mod overlay;
mod pipeline;
mod shared;
mod storage;
mod vision;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::analysis::MatchStrategy;
use crate::app::PlateVerifierApp;
use crate::config::AppConfig;

/// plate-verifier - Real-time license plate verification
#[derive(Parser, Debug)]
#[command(name = "plate-verifier")]
#[command(about = "Detects license plates in a video stream and verifies them against a registry")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the live verification pipeline (default)
    Run {
        /// Stream locator: RTSP URL, video file or image directory
        #[arg(short, long)]
        locator: Option<String>,

        /// Record selection strategy
        #[arg(short, long, value_enum)]
        strategy: Option<MatchStrategy>,

        /// Stop after processing this many frames
        #[arg(long)]
        max_frames: Option<u64>,
    },
    /// Check one plate reading against the registry
    Check {
        /// Plate identifier as read
        identifier: String,
        /// Registration region as read
        region: String,
    },
    /// List registry records for a plate identifier
    Lookup {
        /// Plate identifier
        identifier: String,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    match args.command.unwrap_or(Command::Run {
        locator: None,
        strategy: None,
        max_frames: None,
    }) {
        Command::Run {
            locator,
            strategy,
            max_frames,
        } => {
            let mut config = load_or_default_config(&config_path);
            if let Some(locator) = locator {
                config.stream.locator = locator;
            }
            if let Some(strategy) = strategy {
                config.matching.strategy = strategy;
            }

            info!("plate-verifier starting...");
            info!("Reference store is opened read-only");

            let app = PlateVerifierApp::new(config);
            let stats = app.run(max_frames)?;
            info!("plate-verifier shutdown complete");
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Check { identifier, region } => {
            let app = PlateVerifierApp::new(load_or_default_config(&config_path));
            let report = app.check(&identifier, &region)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Lookup { identifier } => {
            let app = PlateVerifierApp::new(load_or_default_config(&config_path));
            let report = app.lookup(&identifier)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::InitConfig { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            config::save_config(&AppConfig::default(), &config_path)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }

    Ok(())
}

/// Load configuration from file, falling back to defaults
fn load_or_default_config(path: &std::path::Path) -> AppConfig {
    if path.exists() {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => tracing::warn!("Failed to load {:?}: {}", path, e),
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}
