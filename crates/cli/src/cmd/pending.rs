//! Implementation of the `upkeep finish-pending` command.

use anyhow::{Context, Result};

use upkeep_lib::apply::apply_pending;
use upkeep_lib::install_lock::InstallLock;

use super::Overrides;
use crate::output::{OutputFormat, print_info, print_json, print_success, print_warning};

pub fn cmd_finish_pending(overrides: &Overrides, output: OutputFormat) -> Result<()> {
  let config = overrides.load_config()?;
  let root = config.install_root();

  let _lock = InstallLock::acquire(&root, "finish-pending")?;
  let report = apply_pending(&root).context("Failed to finish deferred swaps")?;

  if output.is_json() {
    return print_json(&report);
  }

  if report.applied.is_empty() && report.remaining.is_empty() && report.dropped.is_empty() {
    print_info("No deferred swaps");
    return Ok(());
  }

  for path in &report.applied {
    print_success(&format!("Swapped in {path}"));
  }
  for path in &report.dropped {
    print_warning(&format!("Dropped {path}: staged file is missing"));
  }
  if !report.remaining.is_empty() {
    print_warning(&format!(
      "{} file(s) still locked: {}",
      report.remaining.len(),
      report.remaining.join(", ")
    ));
  }

  Ok(())
}
