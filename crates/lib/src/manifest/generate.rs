//! Manifest generation from a release tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::RepositoryCoordinates;
use crate::util::hash::{HashError, hash_file};

use super::classify::ClassificationTable;
use super::types::{FileEntry, Manifest};

/// Substrings that exclude a path component from a generated manifest.
pub const GENERATOR_EXCLUDES: &[&str] = &[
  ".git",
  ".github",
  "__pycache__",
  ".pyc",
  ".pyo",
  ".DS_Store",
  "Thumbs.db",
  "_backups",
  "_temp_update",
  "_update_cache",
  "_pending",
  "test_",
  ".test",
  ".tmp",
  ".log",
];

#[derive(Debug, Error)]
pub enum GenerateError {
  #[error("release directory not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to walk release directory: {0}")]
  Walk(#[from] walkdir::Error),

  #[error(transparent)]
  Hash(#[from] HashError),
}

/// Build a manifest describing every file under `dir`.
///
/// File URLs point into the published tree described by `coords`. The
/// `type` recorded for each entry is the classification-table result.
pub fn generate_manifest(
  dir: &Path,
  coords: &RepositoryCoordinates,
  version: &str,
  table: &ClassificationTable,
) -> Result<Manifest, GenerateError> {
  if !dir.is_dir() {
    return Err(GenerateError::NotFound(dir.to_path_buf()));
  }

  let mut structure = BTreeMap::new();

  let walker = WalkDir::new(dir)
    .follow_links(false)
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || !is_excluded(&e.file_name().to_string_lossy()));

  for entry in walker {
    let entry = entry?;
    if !entry.file_type().is_file() {
      continue;
    }

    let Ok(relative) = entry.path().strip_prefix(dir) else {
      continue;
    };
    let path = relative.to_string_lossy().replace('\\', "/");
    if path.starts_with("update_system/") {
      continue;
    }

    let size = entry.metadata()?.len();
    let hash = hash_file(entry.path())?;
    debug!(path = %path, size, "adding file");

    structure.insert(
      path.clone(),
      FileEntry {
        source_url: coords.raw_url(&path),
        restart_class: table.classify(&path),
        path,
        size,
        hash,
      },
    );
  }

  let now = Local::now();
  let manifest = Manifest {
    version: version.to_string(),
    structure,
    update_strategy: "progressive".to_string(),
    force_update: false,
    minimum_version: None,
    update_id: Some(format!("update_{}", now.format("%Y%m%d_%H%M%S"))),
    changelog: None,
    release_date: Some(now.to_rfc3339()),
  };

  info!(
    version,
    files = manifest.structure.len(),
    bytes = manifest.total_size(),
    "generated manifest"
  );
  Ok(manifest)
}

fn is_excluded(name: &str) -> bool {
  GENERATOR_EXCLUDES.iter().any(|pattern| name.contains(pattern))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::RestartClass;
  use crate::util::hash::hash_bytes;
  use crate::util::testutil::write_file;
  use tempfile::TempDir;

  fn coords() -> RepositoryCoordinates {
    RepositoryCoordinates {
      owner: "acme".to_string(),
      repo: "app".to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn generates_entries_with_hashes_and_urls() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "main.py", b"print('hi')");
    write_file(temp.path(), "bin/app.exe", b"MZ");
    write_file(temp.path(), "data/config.json", b"{}");

    let manifest = generate_manifest(temp.path(), &coords(), "1.2.0", &ClassificationTable::default()).unwrap();

    assert_eq!(manifest.version, "1.2.0");
    assert_eq!(manifest.structure.len(), 3);

    let exe = &manifest.structure["bin/app.exe"];
    assert_eq!(exe.restart_class, RestartClass::Hard);
    assert_eq!(exe.size, 2);
    assert_eq!(exe.hash, hash_bytes(b"MZ"));
    assert_eq!(exe.source_url, "https://raw.githubusercontent.com/acme/app/main/bin/app.exe");
    assert!(manifest.update_id.as_deref().unwrap().starts_with("update_"));
  }

  #[test]
  fn skips_excluded_patterns() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "keep.py", b"1");
    write_file(temp.path(), ".git/HEAD", b"ref");
    write_file(temp.path(), "__pycache__/keep.cpython-312.pyc", b"x");
    write_file(temp.path(), "run.log", b"x");
    write_file(temp.path(), "test_keep.py", b"x");
    write_file(temp.path(), "_backups/backup_1.zip", b"x");
    write_file(temp.path(), "update_system/manifest.json", b"{}");

    let manifest = generate_manifest(temp.path(), &coords(), "1.0.0", &ClassificationTable::default()).unwrap();

    let paths: Vec<_> = manifest.structure.keys().cloned().collect();
    assert_eq!(paths, vec!["keep.py".to_string()]);
  }

  #[test]
  fn missing_directory_is_an_error() {
    let err = generate_manifest(
      Path::new("/nonexistent/release"),
      &coords(),
      "1.0.0",
      &ClassificationTable::default(),
    )
    .unwrap_err();
    assert!(matches!(err, GenerateError::NotFound(_)));
  }
}
