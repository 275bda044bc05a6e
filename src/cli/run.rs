//! `run` command

use super::{Cli, CliError, OutputFormat};
use crate::collector::config::MAX_CONCURRENCY;
use crate::collector::{Orchestrator, ProgressHandle, RunReport};
use crate::shutdown::SharedShutdown;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::time::Duration;
use tracing::info;

/// Refresh period of the terminal progress bar
const PROGRESS_REFRESH: Duration = Duration::from_millis(250);

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!("concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"));
    }
    Ok(value)
}

/// `run` arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Target id from the registry file
    #[arg(long)]
    pub target: String,

    /// Continue from the existing checkpoint
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Concurrently in-flight requests (overrides the target's settings)
    #[arg(long, value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Seconds between checkpoints (overrides the target's settings)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub checkpoint_interval: Option<u64>,

    /// Total attempts per request (overrides the target's settings)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: Option<u32>,

    /// Hide the terminal progress bar
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

impl RunArgs {
    /// Run the collection and return the process exit code
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<i32, CliError> {
        let registry = cli.load_registry()?;
        let mut target = registry.get(&self.target)?.clone();

        if let Some(concurrency) = self.concurrency {
            target.settings.concurrency = concurrency;
        }
        if let Some(interval) = self.checkpoint_interval {
            target.settings.checkpoint_interval_secs = interval;
        }
        if let Some(attempts) = self.max_attempts {
            target.settings.max_attempts = attempts;
        }
        target.validate().map_err(CliError::InvalidArgument)?;

        let orchestrator = Orchestrator::from_target(&target, shutdown)?
            .with_state_dir(cli.state_dir(&registry));
        info!(
            target = %target.id,
            state = %orchestrator.store().state_path().display(),
            resume = self.resume,
            "Collection requested"
        );

        let bar = (!self.no_progress && cli.output_format == OutputFormat::Human)
            .then(|| spawn_progress_bar(&target.id, orchestrator.progress_handle()));

        let result = orchestrator.run(self.resume).await;

        if let Some((bar, ticker)) = bar {
            ticker.abort();
            bar.finish_and_clear();
        }

        let report = result?;
        print_report(&report, cli.output_format)?;
        Ok(report.outcome.exit_code())
    }
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Human => {
            println!("{}", report.stats.format_summary());
            println!("  collected total:      {}", report.collected);
            println!("  resume position:      {}", report.cursor);
        }
        OutputFormat::Json => {
            let value = json!({
                "target": report.target,
                "outcome": report.outcome.phase(),
                "exit_code": report.outcome.exit_code(),
                "collected": report.collected,
                "total_target": report.total_target,
                "cursor": report.cursor,
                "failed_ordinals": report.failed_ordinals,
                "stats": report.stats,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

/// Progress bar fed from the orchestrator's published snapshots
fn spawn_progress_bar(
    target: &str,
    progress: ProgressHandle,
) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    bar.set_message(format!("Collecting {target}"));

    let ticker = tokio::spawn({
        let bar = bar.clone();
        async move {
            let mut interval = tokio::time::interval(PROGRESS_REFRESH);
            loop {
                interval.tick().await;
                let snapshot = progress.snapshot();
                if let Some(total) = snapshot.total_target {
                    bar.set_length(total);
                } else {
                    bar.set_length(snapshot.collected as u64);
                }
                bar.set_position(snapshot.collected as u64);
                if let Some(cursor) = snapshot.cursor {
                    bar.set_message(format!("{} ({cursor}, {} in flight)", snapshot.phase, snapshot.in_flight));
                }
                if snapshot.phase.is_terminal() {
                    break;
                }
            }
        }
    });

    (bar, ticker)
}
