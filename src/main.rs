//! CLI for meter-bridge
//!
//! Subcommands:
//! - `run`: relay readings until Ctrl-C
//! - `check-config`: print the resolved configuration
//! - `dead-letters`: list entries from a sled dead-letter store

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use meter_bridge::bridge::Bridge;
use meter_bridge::config::load_config_from;
use meter_bridge::dead_letter::{SledDeadLetterStore, open_sink};
use meter_bridge::transport::MqttLink;
use meter_bridge::utils::logging;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "meter-bridge", version, about)]
enum Command {
    /// Relay readings from the broker to the sink until interrupted
    Run {
        /// Configuration file (defaults to config/default.*)
        #[arg(long, env = "BRIDGE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Load and validate the configuration, then print it with secrets redacted
    CheckConfig {
        #[arg(long, env = "BRIDGE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print dead-letter entries from a sled store as JSON lines
    DeadLetters {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cmd = Command::parse();
    let result = match cmd {
        Command::Run { config } => run_bridge(config).await,
        Command::CheckConfig { config } => check_config(config),
        Command::DeadLetters { path, limit } => list_dead_letters(path, limit),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // no-op when the configured subscriber is already installed
            logging::init("info", "text");
            error!("meter-bridge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_bridge(config: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config_from(config.as_deref())?;
    logging::init(&settings.logging.level, &settings.logging.format);

    let sink = open_sink(&settings.dead_letter)?;
    let link = MqttLink::from_settings(&settings.broker)?;
    let bridge = Bridge::new(settings, sink)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received. Draining.");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    bridge.run(link, shutdown).await?;
    Ok(())
}

fn check_config(config: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config_from(config.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
    Ok(())
}

fn list_dead_letters(path: PathBuf, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let store = SledDeadLetterStore::open(&path, None)?;
    for entry in store.load_entries(Some(limit))? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}
