mod cmd;
mod host;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BackupCommand, ManifestCommand};
use output::OutputFormat;

/// upkeep - keep an installed application in step with its published release
#[derive(Parser)]
#[command(name = "upkeep")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the config file (default: <install root>/upkeep.toml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Install root to update (overrides config)
  #[arg(short, long, global = true)]
  root: Option<PathBuf>,

  /// Manifest URL (overrides config)
  #[arg(long, global = true)]
  manifest_url: Option<String>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Check whether an update is available
  Check {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Download and apply the available update
  Apply {
    /// Only apply forced updates
    #[arg(long)]
    no_auto: bool,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show the changes an update would make, without applying them
  Plan {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show installed version, deferred swaps and backups
  Status {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Swap in files deferred by a previous update
  FinishPending {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Manage backups of the install tree
  #[command(subcommand)]
  Backup(BackupCommand),

  /// Generate and validate release manifests
  #[command(subcommand)]
  Manifest(ManifestCommand),
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "info" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let overrides = cmd::Overrides {
    config: cli.config,
    root: cli.root,
    manifest_url: cli.manifest_url,
  };

  match cli.command {
    Commands::Check { output } => cmd::cmd_check(&overrides, output),
    Commands::Apply { no_auto, output } => cmd::cmd_apply(&overrides, !no_auto, cli.verbose, output),
    Commands::Plan { output } => cmd::cmd_plan(&overrides, cli.verbose, output),
    Commands::Status { output } => cmd::cmd_status(&overrides, output),
    Commands::FinishPending { output } => cmd::cmd_finish_pending(&overrides, output),
    Commands::Backup(command) => cmd::cmd_backup(&overrides, command),
    Commands::Manifest(command) => cmd::cmd_manifest(&overrides, command),
  }
}
