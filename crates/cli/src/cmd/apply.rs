//! Implementation of the `upkeep apply` command.
//!
//! Finishes any swaps deferred by a previous run, then drives one full
//! update cycle: fetch, plan, back up, download, apply, record.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};

use upkeep_lib::session::{OutcomeKind, UpdateOutcome};

use super::{Overrides, open_session, runtime};
use crate::host::CliHost;
use crate::output::{
  OutputFormat, dim, format_duration, print_error, print_info, print_json, print_stat, print_success, print_warning,
  symbols,
};

pub fn cmd_apply(overrides: &Overrides, auto_apply: bool, verbose: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let config = overrides.load_config()?;
  let root = config.install_root();
  let host = Arc::new(CliHost::for_root(&root, verbose, output.is_json()));
  let session = open_session(config, host)?;

  let pending = session.apply_pending()?;
  if !output.is_json() && !pending.applied.is_empty() {
    print_info(&format!("Finished {} deferred swap(s)", pending.applied.len()));
  }

  let outcome = runtime()?.block_on(session.apply_update(auto_apply))?;

  if output.is_json() {
    print_json(&outcome)?;
    if is_failure(&outcome) {
      std::process::exit(1);
    }
    return Ok(());
  }

  print_outcome(&outcome);
  if matches!(outcome.kind, OutcomeKind::Applied | OutcomeKind::PartiallyApplied) {
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  if is_failure(&outcome) {
    bail!("{}", outcome.message);
  }
  Ok(())
}

fn is_failure(outcome: &UpdateOutcome) -> bool {
  matches!(
    outcome.kind,
    OutcomeKind::PartiallyApplied | OutcomeKind::CheckFailed | OutcomeKind::Failed | OutcomeKind::RolledBack
  )
}

fn print_outcome(outcome: &UpdateOutcome) {
  match outcome.kind {
    OutcomeKind::UpToDate | OutcomeKind::Applied => print_success(&outcome.message),
    OutcomeKind::Available => print_info(&format!("{} (run without --no-auto to apply)", outcome.message)),
    OutcomeKind::PartiallyApplied => print_warning(&outcome.message),
    OutcomeKind::CheckFailed | OutcomeKind::Failed | OutcomeKind::RolledBack => print_error(&outcome.message),
  }

  if outcome.succeeded + outcome.failed > 0 {
    print_stat("Updated", &outcome.succeeded.to_string());
    print_stat("Failed", &outcome.failed.to_string());
  }

  for path in &outcome.deferred {
    println!("  {} {path} {}", symbols::ARROW, dim("(swapped in at next start)"));
  }

  if !outcome.reloaded.is_empty() {
    print_stat("Reloaded", &outcome.reloaded.join(", "));
  }

  if outcome.restart_required {
    print_warning(&format!("A {} restart is required", outcome.restart_tier));
  }
}
