//! Deferred replacements.
//!
//! A file that cannot be replaced while the process runs is moved to
//! `_pending/<path>` and recorded in `_pending_replacements.json`. The host
//! calls [`apply_pending`] first thing at the next start, before anything
//! opens the files.
//!
//! ```json
//! {
//!   "created_at": "2024-01-15T10:00:00+00:00",
//!   "swaps": [{ "source": "_pending/main.py", "destination": "main.py" }]
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::PENDING_DIR;
use crate::platform::paths::{pending_dir, pending_file};
use crate::util::fs::write_atomic;

#[derive(Debug, Error)]
pub enum PendingError {
  #[error("failed to read pending replacements {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("pending replacements {path} are corrupt: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write pending replacements {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// One recorded swap. Both paths are relative to the install root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSwap {
  pub source: String,
  pub destination: String,
}

impl PendingSwap {
  /// Swap for `relative`, staged under the pending directory.
  pub fn for_path(relative: &str) -> Self {
    Self {
      source: format!("{PENDING_DIR}/{relative}"),
      destination: relative.to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReplacements {
  pub created_at: String,
  pub swaps: Vec<PendingSwap>,
}

/// Outcome of [`apply_pending`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingReport {
  pub applied: Vec<String>,
  /// Destinations still waiting; the instruction file keeps these.
  pub remaining: Vec<String>,
  /// Swaps dropped because their staged file no longer exists.
  pub dropped: Vec<String>,
}

pub fn pending_path(install_root: &Path) -> PathBuf {
  pending_file(install_root)
}

impl PendingReplacements {
  /// Load the instruction file, if there is one.
  pub fn load(install_root: &Path) -> Result<Option<Self>, PendingError> {
    let path = pending_path(install_root);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(PendingError::Read { path, source }),
    };

    serde_json::from_str(&content)
      .map(Some)
      .map_err(|source| PendingError::Parse { path, source })
  }

  pub fn save(&self, install_root: &Path) -> Result<(), PendingError> {
    let path = pending_path(install_root);
    let content = serde_json::to_string_pretty(self).map_err(|e| PendingError::Write {
      path: path.clone(),
      source: io::Error::other(e),
    })?;
    write_atomic(&path, content.as_bytes()).map_err(|source| PendingError::Write { path, source })
  }

  /// Add swaps, replacing any earlier swap for the same destination.
  pub fn merge(&mut self, swaps: impl IntoIterator<Item = PendingSwap>) {
    for swap in swaps {
      self.swaps.retain(|s| s.destination != swap.destination);
      self.swaps.push(swap);
    }
  }

  /// Merge `swaps` into the instruction file on disk.
  pub fn record(install_root: &Path, swaps: Vec<PendingSwap>) -> Result<(), PendingError> {
    if swaps.is_empty() {
      return Ok(());
    }
    let mut pending = Self::load(install_root)?.unwrap_or_default();
    pending.created_at = chrono::Utc::now().to_rfc3339();
    pending.merge(swaps);
    pending.save(install_root)?;
    info!(swaps = pending.swaps.len(), "pending replacements recorded");
    Ok(())
  }
}

/// Perform every recorded swap.
///
/// The instruction file is deleted once every swap succeeded and rewritten
/// with the remaining swaps otherwise. Calling this with nothing pending is
/// a no-op.
pub fn apply_pending(install_root: &Path) -> Result<PendingReport, PendingError> {
  let Some(pending) = PendingReplacements::load(install_root)? else {
    return Ok(PendingReport::default());
  };

  let mut report = PendingReport::default();
  let mut remaining = Vec::new();

  for swap in pending.swaps {
    let source = install_root.join(&swap.source);
    let destination = install_root.join(&swap.destination);

    if !source.exists() {
      warn!(destination = %swap.destination, "staged file missing, dropping pending swap");
      report.dropped.push(swap.destination);
      continue;
    }

    let result = destination
      .parent()
      .map_or(Ok(()), fs::create_dir_all)
      .and_then(|()| fs::rename(&source, &destination));

    match result {
      Ok(()) => {
        debug!(destination = %swap.destination, "pending swap applied");
        report.applied.push(swap.destination);
      }
      Err(e) => {
        warn!(destination = %swap.destination, error = %e, "pending swap failed, keeping it");
        report.remaining.push(swap.destination.clone());
        remaining.push(swap);
      }
    }
  }

  if remaining.is_empty() {
    match fs::remove_file(pending_path(install_root)) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(source) => {
        return Err(PendingError::Write {
          path: pending_path(install_root),
          source,
        });
      }
    }
    let _ = fs::remove_dir_all(pending_dir(install_root));
  } else {
    PendingReplacements {
      created_at: pending.created_at,
      swaps: remaining,
    }
    .save(install_root)?;
  }

  info!(
    applied = report.applied.len(),
    remaining = report.remaining.len(),
    dropped = report.dropped.len(),
    "pending replacements processed"
  );
  Ok(report)
}
