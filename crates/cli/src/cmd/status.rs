//! Status command implementation.
//!
//! Shows the installed version, swaps waiting for the next start and the
//! retained backups of an install tree.

use anyhow::{Context, Result};
use serde::Serialize;

use upkeep_lib::apply::{PendingReplacements, VersionRecord};
use upkeep_lib::backup::BackupStore;
use upkeep_lib::install_lock::{InstallLock, LockState};

use super::Overrides;
use crate::output::{OutputFormat, format_bytes, print_info, print_json, print_stat, print_success, print_warning};

#[derive(Debug, Serialize)]
struct StatusOutput {
  install_root: String,
  manifest_url: String,
  version: Option<VersionRecord>,
  pending: Vec<String>,
  backups: usize,
  backup_bytes: u64,
  locked_by: Option<String>,
}

pub fn cmd_status(overrides: &Overrides, output: OutputFormat) -> Result<()> {
  let config = overrides.load_config()?;
  let root = config.install_root();

  let version = VersionRecord::load(&root).context("Failed to read version record")?;
  let pending = PendingReplacements::load(&root)
    .context("Failed to read deferred swaps")?
    .map(|p| p.swaps.into_iter().map(|s| s.destination).collect())
    .unwrap_or_default();
  let backups = BackupStore::new(&root, config.backup_retention)
    .list()
    .context("Failed to list backups")?;

  let locked_by = if root.is_dir() {
    match InstallLock::peek(&root).context("Failed to inspect install lock")? {
      LockState::Free => None,
      LockState::Held(Some(holder)) => Some(holder.to_string()),
      LockState::Held(None) => Some("another process".to_string()),
    }
  } else {
    None
  };

  let status = StatusOutput {
    install_root: root.display().to_string(),
    manifest_url: config.manifest_url(),
    version,
    pending,
    backups: backups.len(),
    backup_bytes: backups.iter().map(|b| b.size).sum(),
    locked_by,
  };

  if output.is_json() {
    return print_json(&status);
  }

  match &status.version {
    Some(record) => {
      print_success(&format!("Installed version: {}", record.version));
      print_stat("Updated", &record.updated);
      if let Some(id) = &record.update_id {
        print_stat("Update", id);
      }
    }
    None => print_info("No version recorded. Run 'upkeep apply' to install."),
  }

  println!();
  print_stat("Install root", &status.install_root);
  print_stat("Manifest", &status.manifest_url);
  print_stat(
    "Backups",
    &format!("{} ({})", status.backups, format_bytes(status.backup_bytes)),
  );

  if !status.pending.is_empty() {
    println!();
    print_warning(&format!(
      "{} file(s) waiting for the next start: {}",
      status.pending.len(),
      status.pending.join(", ")
    ));
  }

  if let Some(holder) = &status.locked_by {
    println!();
    print_warning(&format!("Install tree is locked by {holder}"));
  }

  Ok(())
}
