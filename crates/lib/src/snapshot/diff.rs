//! Diff planning between the local snapshot and the manifest.
//!
//! The plan is a pure function of its inputs: no I/O, and every list comes
//! out sorted by path so two computations over the same inputs compare equal.
//!
//! Paths are matched exactly. A file that only changed case, or identical
//! content that moved to a new path, is planned as an independent add and
//! delete; renames are not detected.

use serde::Serialize;
use tracing::debug;

use crate::manifest::{FileEntry, Manifest, RestartClass};

use super::types::{InstallationSnapshot, ProtectedPaths};

/// Changes needed to turn the snapshot into the manifest's tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdatePlan {
  /// Manifest entries absent locally.
  pub add: Vec<FileEntry>,
  /// Manifest entries present locally with a different (or unknown) hash.
  pub update: Vec<FileEntry>,
  /// Local paths absent from the manifest.
  pub delete: Vec<String>,
  /// Bytes to transfer for `add` and `update`.
  pub total_bytes: u64,
  /// Most severe restart class across `add` and `update`.
  pub restart_tier: RestartClass,
}

impl UpdatePlan {
  pub fn is_empty(&self) -> bool {
    self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
  }

  /// Entries that need bytes on disk, adds first.
  pub fn incoming(&self) -> impl Iterator<Item = &FileEntry> {
    self.add.iter().chain(self.update.iter())
  }

  /// Number of file operations in the plan.
  pub fn len(&self) -> usize {
    self.add.len() + self.update.len() + self.delete.len()
  }
}

/// Compute the plan turning `snapshot` into `manifest`.
///
/// Manifest entries targeting a protected path are ignored, so the engine
/// never overwrites its own state. Protected local paths are never deleted.
pub fn compute_plan(snapshot: &InstallationSnapshot, manifest: &Manifest, protected: &ProtectedPaths) -> UpdatePlan {
  let mut plan = UpdatePlan::default();

  for (path, entry) in &manifest.structure {
    if protected.is_protected(path) {
      debug!(path = %path, "ignoring manifest entry for protected path");
      continue;
    }

    match snapshot.get(path) {
      None => plan.add.push(entry.clone()),
      Some(local) => {
        let same = local.hash.as_ref().is_some_and(|h| entry.hash.matches(h.as_str()));
        if !same {
          plan.update.push(entry.clone());
        }
      }
    }
  }

  plan.delete = snapshot
    .files
    .keys()
    .filter(|path| !manifest.structure.contains_key(*path) && !protected.is_protected(path))
    .cloned()
    .collect();

  plan.total_bytes = plan.incoming().map(|e| e.size).sum();
  plan.restart_tier = plan
    .incoming()
    .map(|e| e.restart_class)
    .max()
    .unwrap_or_default();

  debug!(
    add = plan.add.len(),
    update = plan.update.len(),
    delete = plan.delete.len(),
    bytes = plan.total_bytes,
    tier = %plan.restart_tier,
    "plan computed"
  );

  plan
}
