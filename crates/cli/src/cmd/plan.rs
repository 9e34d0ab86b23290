//! Implementation of the `upkeep plan` command.
//!
//! Fetches the manifest and diffs it against a fresh snapshot of the install
//! tree. Nothing is downloaded or written.

use anyhow::{Context, Result};
use serde::Serialize;

use upkeep_lib::manifest::{FileEntry, ManifestFetcher};
use upkeep_lib::snapshot::{UpdatePlan, build_snapshot_async, compute_plan};

use super::{Overrides, runtime};
use crate::output::{OutputFormat, PlanMark, dim, format_bytes, print_info, print_json, print_stat, truncate_hash};

#[derive(Serialize)]
struct PlanOutput<'a> {
  version: &'a str,
  install_root: String,
  plan: &'a UpdatePlan,
}

pub fn cmd_plan(overrides: &Overrides, verbose: bool, output: OutputFormat) -> Result<()> {
  let config = overrides.load_config()?;
  let root = config.install_root();
  let protected = config.protected_paths();

  let fetcher = ManifestFetcher::new(
    config.manifest_url(),
    config.manifest_timeout(),
    config.classification.clone(),
    config.repository.clone(),
  )
  .context("Failed to build manifest client")?;

  let rt = runtime()?;
  let manifest = rt.block_on(fetcher.fetch()).context("Failed to fetch manifest")?;
  let snapshot = rt
    .block_on(build_snapshot_async(&root, &protected))
    .with_context(|| format!("Failed to scan {}", root.display()))?;
  let plan = compute_plan(&snapshot, &manifest, &protected);

  if output.is_json() {
    return print_json(&PlanOutput {
      version: &manifest.version,
      install_root: root.display().to_string(),
      plan: &plan,
    });
  }

  if plan.is_empty() {
    print_info(&format!("No changes: install matches {}", manifest.version));
    return Ok(());
  }

  println!("Plan: {} ({} files scanned)", manifest.version, snapshot.len());
  for entry in &plan.add {
    print_entry(PlanMark::Add, entry, verbose);
  }
  for entry in &plan.update {
    print_entry(PlanMark::Update, entry, verbose);
  }
  for path in &plan.delete {
    println!("  {} {path}", PlanMark::Delete.render());
  }

  println!();
  print_stat("Add", &plan.add.len().to_string());
  print_stat("Update", &plan.update.len().to_string());
  print_stat("Delete", &plan.delete.len().to_string());
  print_stat("Download", &format_bytes(plan.total_bytes));
  print_stat("Restart", plan.restart_tier.as_str());

  Ok(())
}

fn print_entry(mark: PlanMark, entry: &FileEntry, verbose: bool) {
  if !verbose {
    println!("  {} {}", mark.render(), entry.path);
    return;
  }
  let detail = format!(
    "({}, {}, {})",
    format_bytes(entry.size),
    truncate_hash(entry.hash.as_str()),
    entry.restart_class
  );
  println!("  {} {} {}", mark.render(), entry.path, dim(&detail));
}
