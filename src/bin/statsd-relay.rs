//! Binary entry point: parse CLI args, load config, stand up the daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use statsd_relay::{config, signals, Core};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the daemon's `key=value` config file.
    config_path: PathBuf,

    /// Override the config file's `log_level`.
    #[clap(long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match config::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            // The subscriber isn't installed yet; a config load failure is
            // reported directly since nothing downstream can log it either.
            eprintln!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = args
        .log_level
        .as_deref()
        .map(|s| s.parse::<tracing::Level>())
        .transpose()
        .unwrap_or(None)
        .unwrap_or_else(|| config.log_level.into());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        )
        .init();

    let core = match Core::new(config).await {
        Ok(core) => core,
        Err(e) => {
            error!(error = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    let (shutdown, watcher) = signals::new();
    tokio::spawn(signals::watch_for_signals(shutdown));

    core.run(watcher).await;
    ExitCode::SUCCESS
}
