//! splice-relay
//!
//! Loads the listener file, starts one reactor thread per entry and waits
//! on them. Runs until killed; there is no graceful shutdown.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result};
use splice_relay::config::{load_listeners, Config, LogFormat};
use splice_relay::ListenerSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "splice-relay failed");
            // Log the error chain
            for cause in e.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            ExitCode::FAILURE
        }
    }
}

/// Prefer RUST_LOG, fall back to RELAY_LOG_LEVEL.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let ansi = io::stdout().is_terminal();
    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(ansi)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn run(config: &Config) -> Result<()> {
    let listeners = load_listeners(&config.config_path)?;
    info!(count = listeners.len(), "listeners configured");

    let set = ListenerSet::spawn(listeners).context("Failed to spawn listener threads")?;

    // Reactors only return on failure, which they log themselves.
    let results = set.join();
    let failed = results.iter().filter(|(_, result)| result.is_err()).count();
    if !results.is_empty() {
        warn!(failed, total = results.len(), "every listener stopped");
    }

    Ok(())
}
