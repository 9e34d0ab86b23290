//! Manifest types for upkeep.
//!
//! The manifest is the remote description of the desired install tree. It is
//! fetched once per check cycle and never mutated afterwards.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "version": "1.0.2",
//!   "update_strategy": "progressive",
//!   "force_update": false,
//!   "minimum_version": "1.0.0",
//!   "structure": {
//!     "main.py": { "size": 1532, "hash": "9f86d0...", "url": "https://...", "type": "soft" }
//!   }
//! }
//! ```
//!
//! `version`, `structure` and `update_strategy` are required. A manifest
//! missing any of them is rejected as a whole.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::hash::ContentHash;

/// Severity of a change.
///
/// Ordered so that `max` yields the most severe class: `Hard > Soft > None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartClass {
  /// Hot-reloadable in process.
  #[default]
  None,
  /// Needs an orchestrated restart of the application.
  Soft,
  /// Needs the whole process image replaced.
  Hard,
}

impl RestartClass {
  pub fn as_str(&self) -> &'static str {
    match self {
      RestartClass::None => "none",
      RestartClass::Soft => "soft",
      RestartClass::Hard => "hard",
    }
  }

  /// True if applying a change of this class needs a restart.
  pub fn requires_restart(&self) -> bool {
    *self != RestartClass::None
  }
}

impl fmt::Display for RestartClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RestartClass {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "none" | "hot_reload" => Ok(RestartClass::None),
      "soft" | "soft_restart" => Ok(RestartClass::Soft),
      "hard" | "hard_restart" => Ok(RestartClass::Hard),
      _ => Err(()),
    }
  }
}

/// One file of the desired tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
  /// Path relative to the install root, `/`-separated.
  pub path: String,
  pub size: u64,
  pub hash: ContentHash,
  pub source_url: String,
  pub restart_class: RestartClass,
}

/// Remote desired state, validated and classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub version: String,
  /// Keyed by relative path. A `BTreeMap` keeps iteration order stable so
  /// plans derived from it are deterministic.
  pub structure: BTreeMap<String, FileEntry>,
  pub update_strategy: String,
  pub force_update: bool,
  pub minimum_version: Option<String>,
  pub update_id: Option<String>,
  pub changelog: Option<String>,
  pub release_date: Option<String>,
}

impl Manifest {
  /// Sum of all entry sizes.
  pub fn total_size(&self) -> u64 {
    self.structure.values().map(|e| e.size).sum()
  }

  /// Convert back to the wire representation.
  pub fn to_wire(&self) -> WireManifest {
    WireManifest {
      version: self.version.clone(),
      update_strategy: self.update_strategy.clone(),
      force_update: self.force_update,
      minimum_version: self.minimum_version.clone(),
      update_id: self.update_id.clone(),
      changelog: self.changelog.clone(),
      release_date: self.release_date.clone(),
      structure: self
        .structure
        .iter()
        .map(|(path, entry)| {
          (
            path.clone(),
            WireEntry {
              path: Some(entry.path.clone()),
              size: Some(entry.size),
              hash: Some(entry.hash.0.clone()),
              url: Some(entry.source_url.clone()),
              kind: Some(entry.restart_class.as_str().to_string()),
            },
          )
        })
        .collect(),
    }
  }
}

/// The manifest as it appears on the wire, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireManifest {
  pub version: String,
  pub structure: BTreeMap<String, WireEntry>,
  pub update_strategy: String,
  #[serde(default)]
  pub force_update: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub minimum_version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub update_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub changelog: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub release_date: Option<String>,
}

/// A structure entry as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEntry {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  #[serde(default)]
  pub size: Option<u64>,
  #[serde(default)]
  pub hash: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  /// Optional classification hint.
  #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
}
