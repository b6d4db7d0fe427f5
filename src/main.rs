//! Eventing - durable, cluster-coordinated job queue
//!
//! Main entry point for the Eventing CLI.

mod cli;
mod cmd_check_config;
mod cmd_run;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use eventing_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig, ValidationWarning};

use crate::cli::{Cli, Commands};
use crate::cmd_run::RunOptions;

fn log_dir(logging: &LoggingConfig) -> PathBuf {
    let expanded = ConfigLoader::expand_path(&logging.directory);
    if expanded.starts_with('~') {
        // no home directory to expand against
        return dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("eventing")
            .join("logs");
    }
    PathBuf::from(expanded)
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let log_dir = log_dir(logging);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&logging.file_prefix)
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // flushes the file writer when the process exits
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Load and validate the config file, or the defaults when it does not exist.
fn load_config(path: &Path) -> Result<(Config, Vec<ValidationWarning>, bool)> {
    if !path.exists() {
        return Ok((Config::default(), Vec::new(), false));
    }
    let config =
        ConfigLoader::load(path).with_context(|| format!("loading {}", path.display()))?;
    let warnings = ConfigValidator::validate(&config)?
        .ensure_valid()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok((config, warnings, true))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::CheckConfig) = cli.command {
        return cmd_check_config::handle_check_config(&cli.config);
    }

    let (config, warnings, loaded) = load_config(&cli.config)?;
    init_tracing(&config.logging)?;
    info!("Starting Eventing v{}", env!("CARGO_PKG_VERSION"));
    if loaded {
        info!("Configuration loaded from {}", cli.config.display());
    } else {
        warn!("{} not found, using defaults", cli.config.display());
    }
    for warning in &warnings {
        warn!("Config {}", warning);
    }

    let options = match cli.command {
        Some(Commands::Run {
            nodes,
            jobs,
            topic,
            fail_every,
            timeout,
        }) => RunOptions {
            nodes,
            jobs,
            topic,
            fail_every,
            timeout: Duration::from_secs(timeout),
        },
        _ => RunOptions {
            nodes: 3,
            jobs: 20,
            topic: "demo/work".to_string(),
            fail_every: 0,
            timeout: Duration::from_secs(60),
        },
    };
    cmd_run::handle_run_command(config, options).await
}
