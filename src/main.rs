//! Main entry point for the registry-harvester CLI

use anyhow::Context;
use clap::Parser;
use registry_harvester::cli::{Cli, Commands};
use registry_harvester::metrics;
use registry_harvester::shutdown::ShutdownCoordinator;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("registry_harvester=info"));

    // Logs go to stderr so command output on stdout stays parseable
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn execute(cli: &Cli) -> anyhow::Result<i32> {
    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr).context("starting metrics exporter")?;
    }

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - checkpointing and stopping...");
                shutdown.request_shutdown();
            }
        }
    });

    let code = match &cli.command {
        Commands::Run(args) => args
            .execute(cli, shutdown)
            .await
            .with_context(|| format!("run of '{}' failed", args.target))?,
        Commands::Status(args) => args.execute(cli).map(|()| 0)?,
        Commands::Reset(args) => args.execute(cli).map(|()| 0)?,
        Commands::Targets(args) => args.execute(cli).map(|()| 0)?,
    };
    Ok(code)
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let code = match execute(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
