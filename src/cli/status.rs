//! `status` and `reset` commands

use super::{Cli, CliError, OutputFormat};
use crate::collector::RunStats;
use crate::resume::{CheckpointStore, CollectionState};
use clap::Args;
use serde_json::json;
use tracing::info;

/// `status` arguments
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Target id from the registry file
    #[arg(long)]
    pub target: String,
}

impl StatusArgs {
    /// Print checkpoint progress without touching the lock
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let registry = cli.load_registry()?;
        let target = registry.get(&self.target)?;
        let store = CheckpointStore::new(cli.state_dir(&registry), &target.id);

        let state = store.load_for(target)?;
        let last_run: Option<RunStats> = store.load_stats()?;

        match cli.output_format {
            OutputFormat::Human => print_human(&store, state.as_ref(), last_run.as_ref()),
            OutputFormat::Json => {
                let value = json!({
                    "target": target.id,
                    "state_path": store.state_path(),
                    "checkpoint": state.as_ref().map(|s| json!({
                        "collected": s.collected_count(),
                        "total_target": s.total_target(),
                        "percent": percent(s),
                        "cursor": s.cursor(),
                        "failed_ordinals": s.failed(),
                        "run_count": s.run_count(),
                        "last_checkpoint_at": s.last_checkpoint_at(),
                        "created_at": s.created_at(),
                    })),
                    "last_run": last_run,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        }
        Ok(())
    }
}

fn percent(state: &CollectionState) -> Option<f64> {
    let total = state.total_target()?;
    if total == 0 {
        return Some(100.0);
    }
    Some((state.collected_count() as f64 / total as f64 * 100.0).min(100.0))
}

fn print_human(store: &CheckpointStore, state: Option<&CollectionState>, last_run: Option<&RunStats>) {
    let Some(state) = state else {
        println!("No checkpoint for '{}' at {}", store.target(), store.state_path().display());
        return;
    };

    println!("Target:           {}", state.target());
    println!("Checkpoint:       {}", store.state_path().display());
    match (state.total_target(), percent(state)) {
        (Some(total), Some(pct)) => {
            println!("Collected:        {} of {} ({pct:.1}%)", state.collected_count(), total)
        }
        _ => println!("Collected:        {}", state.collected_count()),
    }
    println!("Resume position:  {}", state.cursor());
    if !state.failed().is_empty() {
        let failed: Vec<String> = state.failed().iter().map(u64::to_string).collect();
        println!("Failed ordinals:  {}", failed.join(", "));
    }
    println!("Runs:             {}", state.run_count());
    match state.last_checkpoint_at() {
        Some(at) => println!("Last checkpoint:  {}", at.to_rfc3339()),
        None => println!("Last checkpoint:  never"),
    }
    if let Some(stats) = last_run {
        println!();
        println!("{}", stats.format_summary());
    }
}

/// `reset` arguments
#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Target id from the registry file
    #[arg(long)]
    pub target: String,
}

impl ResetArgs {
    /// Delete the checkpoint and last-run statistics.
    ///
    /// Takes the checkpoint lock first so a running collection is never reset
    /// underneath itself.
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let registry = cli.load_registry()?;
        let target = registry.get(&self.target)?;
        let store = CheckpointStore::new(cli.state_dir(&registry), &target.id);

        let _lock = store.lock()?;
        if store.remove()? {
            info!(target = %target.id, path = %store.state_path().display(), "Checkpoint removed");
            println!("Removed checkpoint for '{}'", target.id);
        } else {
            println!("No checkpoint for '{}'", target.id);
        }
        Ok(())
    }
}
