// Recap research agent
// Main entry point for the recap binary

use clap::Parser;
use recap_engine::cli::{Cli, Command};
use recap_engine::config::Config;
use recap_engine::handlers::{
    handle_doctor, handle_history, handle_replay, handle_run, handle_secret, OutputFormat,
};
use recap_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Secrets never need a config file
    if let Command::Secret { action } = cli.command {
        match &cli.log {
            Some(level) => init_telemetry_with_level(level),
            None => init_telemetry(),
        }
        return handle_secret(action, format).await;
    }

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // RUST_LOG > --log > config
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("Recap v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Run {
            question,
            non_streaming,
            timeout_secs,
        } => {
            tracing::info!("Researching: {}", question);
            handle_run(question, non_streaming, timeout_secs, &config, format).await
        }

        Command::History { limit } => handle_history(limit, &config, format).await,

        Command::Replay { run_id } => {
            tracing::info!("Replaying run: {}", run_id);
            handle_replay(run_id, &config, format).await
        }

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }

        Command::Secret { .. } => Ok(()),
    }
}
