//! Implementation of the `upkeep backup` subcommands.

use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tracing::info;

use upkeep_lib::backup::{Backup, BackupStore};
use upkeep_lib::install_lock::InstallLock;
use upkeep_lib::session::UpdateHost;
use upkeep_lib::snapshot::build_snapshot;

use super::Overrides;
use crate::host::CliHost;
use crate::output::{OutputFormat, format_bytes, print_info, print_json, print_success};
use crate::prompts::confirm;

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
  /// List retained backups, newest first
  List {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Archive the install tree now
  Create {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Restore a backup over the install tree
  Restore {
    /// Backup file name (default: the newest backup)
    name: Option<String>,

    /// Skip confirmation prompt
    #[arg(long)]
    force: bool,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Delete backups beyond the retention count
  Prune {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

#[derive(Debug, Serialize)]
struct BackupListItem<'a> {
  #[serde(flatten)]
  backup: &'a Backup,
  age_secs: u64,
}

pub fn cmd_backup(overrides: &Overrides, command: BackupCommand) -> Result<()> {
  let config = overrides.load_config()?;
  let root = config.install_root();
  let store = BackupStore::new(&root, config.backup_retention);

  match command {
    BackupCommand::List { output } => cmd_list(&store, output),
    BackupCommand::Create { output } => {
      let _lock = InstallLock::acquire(&root, "backup create")?;
      let snapshot = build_snapshot(&root, &config.protected_paths())
        .with_context(|| format!("Failed to scan {}", root.display()))?;
      let version = CliHost::for_root(&root, false, true).current_version();
      let report = store.create(&snapshot, &version).context("Failed to create backup")?;

      if output.is_json() {
        return print_json(&report);
      }
      print_success(&format!(
        "Created {} ({} files, {})",
        report.backup.name,
        report.archived,
        format_bytes(report.backup.size)
      ));
      for name in &report.pruned {
        print_info(&format!("Pruned {name}"));
      }
      Ok(())
    }
    BackupCommand::Restore { name, force, output } => {
      let backup = match name {
        Some(name) => store.find(&name)?,
        None => store.latest()?,
      };

      if !confirm(
        &format!("Restore {} over {}?", backup.name, root.display()),
        force,
      )? {
        print_info("Aborted");
        return Ok(());
      }

      let _lock = InstallLock::acquire(&root, "backup restore")?;
      info!(backup = %backup.name, "restoring");
      let report = store.restore(&backup).context("Failed to restore backup")?;

      if output.is_json() {
        return print_json(&report);
      }
      print_success(&format!("Restored {} files from {}", report.restored, report.backup));
      Ok(())
    }
    BackupCommand::Prune { output } => {
      let _lock = InstallLock::acquire(&root, "backup prune")?;
      let pruned = store.prune().context("Failed to prune backups")?;

      if output.is_json() {
        return print_json(&pruned);
      }
      if pruned.is_empty() {
        print_info("Nothing to prune");
      }
      for name in &pruned {
        print_success(&format!("Deleted {name}"));
      }
      Ok(())
    }
  }
}

fn cmd_list(store: &BackupStore, output: OutputFormat) -> Result<()> {
  let backups = store.list().context("Failed to list backups")?;
  let now = SystemTime::now();
  let age = |b: &Backup| {
    now
      .duration_since(SystemTime::from(b.created_at))
      .map(|d| d.as_secs())
      .unwrap_or(0)
  };

  if output.is_json() {
    let items: Vec<BackupListItem> = backups
      .iter()
      .map(|backup| BackupListItem {
        backup,
        age_secs: age(backup),
      })
      .collect();
    return print_json(&items);
  }

  if backups.is_empty() {
    print_info("No backups found");
    return Ok(());
  }

  for backup in &backups {
    println!(
      "{} - {} ({}, {} ago)",
      backup.name,
      backup.version,
      format_bytes(backup.size),
      humantime::format_duration(Duration::from_secs(age(backup)))
    );
  }
  print_info(&format!("{} backup(s) total", backups.len()));

  Ok(())
}
