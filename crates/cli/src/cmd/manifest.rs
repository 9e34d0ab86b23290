//! Implementation of the `upkeep manifest` subcommands.
//!
//! `generate` describes a release tree as a manifest; `validate` runs a
//! manifest file through the same checks the updater applies when fetching.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;

use upkeep_lib::manifest::{generate_manifest, parse_manifest};

use super::Overrides;
use crate::output::{OutputFormat, format_bytes, print_json, print_stat, print_success};

#[derive(Subcommand, Debug)]
pub enum ManifestCommand {
  /// Generate a manifest describing a release directory
  Generate {
    /// Release directory to describe
    dir: PathBuf,

    /// Release version
    #[arg(long)]
    version: String,

    /// Base URL for file downloads (default: the configured repository)
    #[arg(long)]
    base_url: Option<String>,

    /// Mark the release as a required update
    #[arg(long)]
    force: bool,

    /// Oldest version allowed to keep running
    #[arg(long)]
    minimum_version: Option<String>,

    /// Write the manifest here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Check a manifest file
  Validate {
    file: PathBuf,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

#[derive(Serialize)]
struct ValidateOutput<'a> {
  version: &'a str,
  files: usize,
  total_bytes: u64,
}

pub fn cmd_manifest(overrides: &Overrides, command: ManifestCommand) -> Result<()> {
  let config = overrides.load_config()?;

  match command {
    ManifestCommand::Generate {
      dir,
      version,
      base_url,
      force,
      minimum_version,
      out,
    } => {
      let mut manifest = generate_manifest(&dir, &config.repository, &version, &config.classification)
        .with_context(|| format!("Failed to generate manifest for {}", dir.display()))?;
      manifest.force_update = force;
      manifest.minimum_version = minimum_version;

      if let Some(base) = base_url {
        let base = base.trim_end_matches('/');
        for entry in manifest.structure.values_mut() {
          entry.source_url = format!("{base}/{}", entry.path);
        }
      }

      let json = serde_json::to_string_pretty(&manifest.to_wire()).context("Failed to serialize manifest")?;
      match out {
        Some(path) => {
          write_manifest(&path, &json)?;
          print_success(&format!(
            "Wrote {} ({} files, {})",
            path.display(),
            manifest.structure.len(),
            format_bytes(manifest.total_size())
          ));
        }
        None => println!("{json}"),
      }
      Ok(())
    }
    ManifestCommand::Validate { file, output } => {
      let body = fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
      let manifest = parse_manifest(&body, &config.classification, &config.repository)
        .with_context(|| format!("Invalid manifest: {}", file.display()))?;

      if output.is_json() {
        return print_json(&ValidateOutput {
          version: &manifest.version,
          files: manifest.structure.len(),
          total_bytes: manifest.total_size(),
        });
      }

      print_success(&format!("{} is valid", file.display()));
      print_stat("Version", &manifest.version);
      print_stat("Files", &manifest.structure.len().to_string());
      print_stat("Size", &format_bytes(manifest.total_size()));
      if manifest.force_update {
        print_stat("Forced", "yes");
      }
      Ok(())
    }
  }
}

fn write_manifest(path: &Path, json: &str) -> Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }
  fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
