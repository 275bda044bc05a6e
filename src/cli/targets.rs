//! `targets` command: list configured targets

use super::{Cli, CliError, OutputFormat};
use crate::registry::StrategyConfig;
use crate::resume::CheckpointStore;
use clap::Args;
use serde_json::json;

/// `targets` arguments
#[derive(Args, Debug)]
pub struct TargetsCommand {
    /// Only list targets whose id contains this text
    pub filter: Option<String>,
}

impl TargetsCommand {
    /// Print every configured target with its strategy and checkpoint presence
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let registry = cli.load_registry()?;
        let state_dir = cli.state_dir(&registry);

        let targets: Vec<_> = registry
            .targets()
            .iter()
            .filter(|t| self.filter.as_deref().is_none_or(|f| t.id.contains(f)))
            .collect();

        match cli.output_format {
            OutputFormat::Human => {
                if targets.is_empty() {
                    println!("No targets configured in {}", cli.config.display());
                }
                for target in targets {
                    let checkpoint = if CheckpointStore::new(state_dir, &target.id).exists() {
                        "checkpoint"
                    } else {
                        "-"
                    };
                    println!(
                        "{:<24} {:<28} {}{}  [{}]",
                        target.id,
                        describe_strategy(&target.strategy),
                        target.base_url,
                        target.path,
                        checkpoint
                    );
                }
            }
            OutputFormat::Json => {
                let list: Vec<_> = targets
                    .iter()
                    .map(|target| {
                        json!({
                            "id": target.id,
                            "url": format!("{}{}", target.base_url, target.path),
                            "strategy": target.strategy,
                            "has_checkpoint": CheckpointStore::new(state_dir, &target.id).exists(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&list)?);
            }
        }
        Ok(())
    }
}

fn describe_strategy(strategy: &StrategyConfig) -> String {
    match strategy {
        StrategyConfig::Paged { page_size, .. } => format!("paged (size {page_size})"),
        StrategyConfig::IdSweep { start_id, end_id: Some(end), .. } => {
            format!("id sweep ({start_id}..={end})")
        }
        StrategyConfig::IdSweep { start_id, end_id: None, .. } => format!("id sweep (from {start_id})"),
    }
}
