mod config;
mod gemini;
mod telemetry;
mod wiring;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use market_data::generators::DEFAULT_SESSION_MINUTES;
use runtime::{create_output_log, RunLogWriter, TracingRunLogWriter};
use tokio::sync::watch;
use tracing::{info, warn};

const DEFAULT_DEMO_SEED: u64 = 42;

#[derive(Debug, Parser)]
#[command(
    name = "sentinel",
    version,
    about = "Replays price ticks and news at accelerated pace and enriches volatility spikes"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Replay the configured sources into the output log (default).
    Run,
    /// Write a seeded demo session to the configured source paths.
    Generate {
        #[arg(long, default_value_t = DEFAULT_DEMO_SEED)]
        seed: u64,
        #[arg(
            long,
            default_value_t = DEFAULT_SESSION_MINUTES,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        minutes: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let config = config::Config::from_env().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Generate { seed, minutes } => {
            let start = wiring::current_hour_utc()?;
            wiring::write_demo_session(&config, seed, minutes, start)?;
            Ok(())
        }
    }
}

async fn run(config: &config::Config) -> anyhow::Result<()> {
    let run_log: Arc<dyn RunLogWriter> = Arc::new(TracingRunLogWriter);
    let mut engine = wiring::build_engine(config, run_log);

    let sources = engine
        .load_sources(&config.prices_path, &config.news_path)
        .context("failed to load replay sources")?;
    let output = match create_output_log(&config.output_path) {
        Ok(output) => output,
        Err(err) => {
            engine.abort();
            return Err(err).with_context(|| {
                format!("failed to create output log {}", config.output_path.display())
            });
        }
    };
    let explainer = wiring::build_explainer(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received; finishing outstanding records");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => warn!(error = %err, "could not listen for Ctrl-C"),
        }
    });

    info!(output = %config.output_path.display(), "writing enriched records");
    let report = engine
        .run(sources, output, explainer, shutdown_rx)
        .await
        .context("replay failed")?;

    info!(
        report = %serde_json::to_string(&report).context("failed to encode run report")?,
        "run report"
    );
    Ok(())
}
