//! Local observed state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::ENGINE_OWNED;
use crate::util::hash::ContentHash;

/// One file found under the install root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
  /// `None` when the file could not be read (permissions, in use).
  pub hash: Option<ContentHash>,
  pub size: u64,
  /// Modification time in seconds since the Unix epoch, if the platform reports one.
  pub modified: Option<u64>,
}

/// Content-addressed inventory of the install tree.
///
/// Rebuilt at the start of every check cycle. Keys are `/`-separated paths
/// relative to `root`, kept in a `BTreeMap` so iteration is ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationSnapshot {
  pub root: PathBuf,
  pub files: BTreeMap<String, LocalFile>,
}

impl InstallationSnapshot {
  pub fn get(&self, path: &str) -> Option<&LocalFile> {
    self.files.get(path)
  }

  pub fn contains(&self, path: &str) -> bool {
    self.files.contains_key(path)
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  /// Files whose bytes could not be read during the scan.
  pub fn unreadable(&self) -> impl Iterator<Item = &str> {
    self.files.iter().filter(|(_, f)| f.hash.is_none()).map(|(p, _)| p.as_str())
  }

  /// Total size of every tracked file.
  pub fn total_size(&self) -> u64 {
    self.files.values().map(|f| f.size).sum()
  }
}

/// Names the engine never scans, backs up or deletes.
///
/// A relative path is protected when any of its components, or the whole
/// path, equals a protected name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedPaths {
  names: BTreeSet<String>,
}

impl Default for ProtectedPaths {
  fn default() -> Self {
    Self::with_extra(std::iter::empty::<String>())
  }
}

impl ProtectedPaths {
  /// Engine-owned names plus `extra`.
  pub fn with_extra<I, S>(extra: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut names: BTreeSet<String> = ENGINE_OWNED.iter().map(|s| s.to_string()).collect();
    names.extend(extra.into_iter().map(|s| s.into().replace('\\', "/")));
    Self { names }
  }

  pub fn is_protected(&self, relative: &str) -> bool {
    let normalized = relative.replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");
    self.names.contains(normalized) || normalized.split('/').any(|component| self.names.contains(component))
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}
