//! CLI command implementations

pub mod error;
pub mod run;
pub mod status;
pub mod targets;

pub use error::CliError;
pub use run::RunArgs;
pub use status::{ResetArgs, StatusArgs};
pub use targets::TargetsCommand;

use crate::registry::TargetRegistry;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default registry file
pub const DEFAULT_CONFIG_PATH: &str = "harvester.toml";

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Registry harvester CLI
#[derive(Parser, Debug)]
#[command(name = "registry-harvester")]
#[command(about = "Resumable bulk collection from paginated registry APIs", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Target registry file
    #[arg(long, global = true, env = "HARVESTER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Checkpoint directory (overrides `state_dir` from the registry file)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true, env = "HARVESTER_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect a target, optionally resuming from its checkpoint
    Run(RunArgs),

    /// Show checkpoint progress for a target
    Status(StatusArgs),

    /// Delete a target's checkpoint
    Reset(ResetArgs),

    /// List configured targets
    Targets(TargetsCommand),
}

impl Cli {
    /// Load the registry named by `--config`
    pub fn load_registry(&self) -> Result<TargetRegistry, CliError> {
        Ok(TargetRegistry::load(&self.config)?)
    }

    /// Checkpoint directory: `--state-dir`, else the registry's
    pub fn state_dir<'a>(&'a self, registry: &'a TargetRegistry) -> &'a Path {
        self.state_dir.as_deref().unwrap_or_else(|| registry.state_dir())
    }
}
