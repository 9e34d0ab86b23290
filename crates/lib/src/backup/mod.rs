//! Pre-update backups and rollback.
//!
//! A backup is one zip archive of every readable tracked file, named
//! `backup_<version>_<unix millis>.zip` under `_backups/`. Archives are
//! written to a `.tmp` sibling and renamed into place, so an interrupted
//! backup never shows up in listings.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::platform::paths::backup_dir;
use crate::snapshot::InstallationSnapshot;

const PREFIX: &str = "backup_";
const SUFFIX: &str = ".zip";

#[derive(Debug, Error)]
pub enum BackupError {
  #[error("failed to create backup directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write backup {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("backup archive {path} is unusable: {source}")]
  Archive {
    path: PathBuf,
    #[source]
    source: zip::result::ZipError,
  },

  #[error("backup archive {path} contains an unsafe entry: {name}")]
  UnsafeEntry { path: PathBuf, name: String },

  #[error("failed to restore {path}: {source}")]
  Restore {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to list backups in {path}: {source}")]
  List {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("backup not found: {0}")]
  NotFound(String),

  #[error("no backups available")]
  NoBackups,
}

/// A retained backup archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backup {
  pub name: String,
  pub path: PathBuf,
  /// Version installed when the backup was taken.
  pub version: String,
  pub created_at: DateTime<Utc>,
  pub size: u64,
}

/// Result of [`BackupStore::create`].
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
  pub backup: Backup,
  pub archived: usize,
  /// Tracked files left out because they could not be read.
  pub skipped: Vec<String>,
  /// Older backups removed by retention.
  pub pruned: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
  pub backup: String,
  pub restored: usize,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
  root: PathBuf,
  dir: PathBuf,
  retention: usize,
}

impl BackupStore {
  pub fn new(install_root: &Path, retention: usize) -> Self {
    Self {
      root: install_root.to_path_buf(),
      dir: backup_dir(install_root),
      retention: retention.max(1),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Archive every tracked file in `snapshot`, then prune old backups.
  pub fn create(&self, snapshot: &InstallationSnapshot, version: &str) -> Result<BackupReport, BackupError> {
    fs::create_dir_all(&self.dir).map_err(|source| BackupError::CreateDir {
      path: self.dir.clone(),
      source,
    })?;

    let (name, created_at) = self.next_name(version);
    let path = self.dir.join(&name);
    let temp = self.dir.join(format!("{name}.tmp"));

    let written = self.write_archive(snapshot, &temp);
    let (archived, skipped) = match written {
      Ok(counts) => counts,
      Err(e) => {
        let _ = fs::remove_file(&temp);
        return Err(e);
      }
    };

    if let Err(source) = fs::rename(&temp, &path) {
      let _ = fs::remove_file(&temp);
      return Err(BackupError::Write { path, source });
    }

    let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    info!(backup = %name, archived, skipped = skipped.len(), size, "backup created");

    let pruned = self.prune_after_create();

    Ok(BackupReport {
      backup: Backup {
        name,
        path,
        version: version.to_string(),
        created_at,
        size,
      },
      archived,
      skipped,
      pruned,
    })
  }

  fn next_name(&self, version: &str) -> (String, DateTime<Utc>) {
    let tag = sanitize_version(version);
    let newest = self
      .list()
      .ok()
      .and_then(|backups| backups.first().map(|b| b.created_at.timestamp_millis()));
    let mut millis = Utc::now().timestamp_millis();
    if let Some(newest) = newest {
      millis = millis.max(newest + 1);
    }
    loop {
      let name = format!("{PREFIX}{tag}_{millis}{SUFFIX}");
      if !self.dir.join(&name).exists() {
        let created_at = Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now);
        return (name, created_at);
      }
      millis += 1;
    }
  }

  fn write_archive(&self, snapshot: &InstallationSnapshot, temp: &Path) -> Result<(usize, Vec<String>), BackupError> {
    let write_err = |source| BackupError::Write {
      path: temp.to_path_buf(),
      source,
    };
    let zip_err = |source| BackupError::Archive {
      path: temp.to_path_buf(),
      source,
    };

    let file = File::create(temp).map_err(write_err)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut archived = 0;
    let mut skipped = Vec::new();

    for (relative, local) in &snapshot.files {
      if local.hash.is_none() {
        warn!(path = %relative, "file was unreadable during scan, not backed up");
        skipped.push(relative.clone());
        continue;
      }

      let mut source = match File::open(self.root.join(relative)) {
        Ok(file) => BufReader::new(file),
        Err(e) => {
          warn!(path = %relative, error = %e, "file unreadable, not backed up");
          skipped.push(relative.clone());
          continue;
        }
      };

      zip.start_file(relative.as_str(), options).map_err(zip_err)?;
      io::copy(&mut source, &mut zip).map_err(write_err)?;
      archived += 1;
      debug!(path = %relative, "archived");
    }

    let mut writer = zip.finish().map_err(zip_err)?;
    io::Write::flush(&mut writer).map_err(write_err)?;
    writer.get_ref().sync_all().map_err(write_err)?;

    Ok((archived, skipped))
  }

  /// Retained backups, newest first.
  pub fn list(&self) -> Result<Vec<Backup>, BackupError> {
    let entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => {
        return Err(BackupError::List {
          path: self.dir.clone(),
          source,
        });
      }
    };

    let mut backups: Vec<Backup> = entries
      .filter_map(Result::ok)
      .filter_map(|entry| {
        let name = entry.file_name().to_string_lossy().to_string();
        let (version, created_at) = parse_name(&name)?;
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        Some(Backup {
          path: entry.path(),
          name,
          version,
          created_at,
          size,
        })
      })
      .collect();

    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.name.cmp(&a.name)));
    Ok(backups)
  }

  pub fn latest(&self) -> Result<Backup, BackupError> {
    self.list()?.into_iter().next().ok_or(BackupError::NoBackups)
  }

  pub fn find(&self, name: &str) -> Result<Backup, BackupError> {
    self
      .list()?
      .into_iter()
      .find(|b| b.name == name || b.name.trim_end_matches(SUFFIX) == name)
      .ok_or_else(|| BackupError::NotFound(name.to_string()))
  }

  /// Remove all but the newest `retention` backups.
  pub fn prune(&self) -> Result<Vec<String>, BackupError> {
    let mut removed = Vec::new();
    for old in self.list()?.into_iter().skip(self.retention) {
      match fs::remove_file(&old.path) {
        Ok(()) => {
          debug!(backup = %old.name, "pruned");
          removed.push(old.name);
        }
        Err(e) => warn!(backup = %old.name, error = %e, "failed to prune backup"),
      }
    }
    Ok(removed)
  }

  /// The new archive is already in place, so a failed prune only warns.
  fn prune_after_create(&self) -> Vec<String> {
    self.prune().unwrap_or_else(|e| {
      warn!(error = %e, "failed to prune old backups");
      Vec::new()
    })
  }

  /// Copy every archived file back over the live tree.
  ///
  /// Each file is written to a sibling and renamed over its destination.
  /// Files created after the backup are left alone.
  pub fn restore(&self, backup: &Backup) -> Result<RestoreReport, BackupError> {
    let archive_err = |source| BackupError::Archive {
      path: backup.path.clone(),
      source,
    };

    let file = File::open(&backup.path).map_err(|source| BackupError::Restore {
      path: backup.path.clone(),
      source,
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(archive_err)?;

    let mut restored = 0;
    for index in 0..archive.len() {
      let mut entry = archive.by_index(index).map_err(archive_err)?;
      if entry.is_dir() {
        continue;
      }

      let relative = entry.enclosed_name().ok_or_else(|| BackupError::UnsafeEntry {
        path: backup.path.clone(),
        name: entry.name().to_string(),
      })?;

      let dest = self.root.join(&relative);
      let restore_err = |source| BackupError::Restore {
        path: dest.clone(),
        source,
      };

      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(restore_err)?;
      }

      let staged = sibling(&dest);
      let result = File::create(&staged)
        .and_then(|mut out| io::copy(&mut entry, &mut out).map(|_| ()))
        .and_then(|()| fs::rename(&staged, &dest));
      if let Err(source) = result {
        let _ = fs::remove_file(&staged);
        return Err(BackupError::Restore { path: dest, source });
      }

      restored += 1;
    }

    info!(backup = %backup.name, restored, "backup restored");
    Ok(RestoreReport {
      backup: backup.name.clone(),
      restored,
    })
  }
}

fn sibling(dest: &Path) -> PathBuf {
  let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".upkeep-restore");
  dest.with_file_name(name)
}

fn sanitize_version(version: &str) -> String {
  let tag: String = version
    .trim()
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
    .collect();
  if tag.is_empty() { "unknown".to_string() } else { tag }
}

fn parse_name(name: &str) -> Option<(String, DateTime<Utc>)> {
  let stem = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
  let (version, millis) = stem.rsplit_once('_')?;
  let millis: i64 = millis.parse().ok()?;
  let created_at = Utc.timestamp_millis_opt(millis).single()?;
  Some((version.to_string(), created_at))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::snapshot::{ProtectedPaths, build_snapshot};
  use crate::util::testutil::write_file;
  use tempfile::TempDir;

  fn hashes(root: &Path) -> Vec<(String, Option<String>)> {
    build_snapshot(root, &ProtectedPaths::default())
      .unwrap()
      .files
      .into_iter()
      .map(|(p, f)| (p, f.hash.map(|h| h.0)))
      .collect()
  }

  fn seeded_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "main.py", b"print('v1')");
    write_file(temp.path(), "lib/util.py", b"def f(): pass");
    write_file(temp.path(), "data/config.json", b"{\"a\": 1}");
    temp
  }

  #[test]
  fn backup_round_trip_on_unmodified_tree() {
    let temp = seeded_tree();
    let before = hashes(temp.path());

    let store = BackupStore::new(temp.path(), 3);
    let snapshot = build_snapshot(temp.path(), &ProtectedPaths::default()).unwrap();
    let report = store.create(&snapshot, "1.0.0").unwrap();
    assert_eq!(report.archived, 3);
    assert!(report.skipped.is_empty());

    store.restore(&report.backup).unwrap();

    assert_eq!(hashes(temp.path()), before);
  }

  #[test]
  fn restore_overwrites_modified_files() {
    let temp = seeded_tree();
    let before = hashes(temp.path());
    let store = BackupStore::new(temp.path(), 3);
    let snapshot = build_snapshot(temp.path(), &ProtectedPaths::default()).unwrap();
    let backup = store.create(&snapshot, "1.0.0").unwrap().backup;

    write_file(temp.path(), "main.py", b"print('v2')");
    std::fs::remove_file(temp.path().join("lib/util.py")).unwrap();

    let report = store.restore(&backup).unwrap();

    assert_eq!(report.restored, 3);
    assert_eq!(hashes(temp.path()), before);
  }

  #[test]
  fn backups_are_named_and_listed_newest_first() {
    let temp = seeded_tree();
    let store = BackupStore::new(temp.path(), 5);
    let snapshot = build_snapshot(temp.path(), &ProtectedPaths::default()).unwrap();

    let first = store.create(&snapshot, "1.0.0").unwrap().backup;
    let second = store.create(&snapshot, "1.0.1").unwrap().backup;

    assert!(first.name.starts_with("backup_1.0.0_"));
    assert!(first.name.ends_with(".zip"));

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].name, second.name);
    assert_eq!(listed[0].version, "1.0.1");
    assert_eq!(store.latest().unwrap().name, second.name);
    assert_eq!(store.find(&first.name).unwrap().version, "1.0.0");
  }

  #[test]
  fn retention_prunes_oldest() {
    let temp = seeded_tree();
    let store = BackupStore::new(temp.path(), 3);
    let snapshot = build_snapshot(temp.path(), &ProtectedPaths::default()).unwrap();

    let names: Vec<String> = (0..5)
      .map(|i| store.create(&snapshot, &format!("1.0.{i}")).unwrap().backup.name)
      .collect();

    let kept: Vec<String> = store.list().unwrap().into_iter().map(|b| b.name).collect();
    assert_eq!(kept, vec![names[4].clone(), names[3].clone(), names[2].clone()]);
  }

  #[test]
  fn interrupted_archives_are_ignored() {
    let temp = seeded_tree();
    let store = BackupStore::new(temp.path(), 3);
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.dir().join("backup_1.0.0_1700000000000.zip.tmp"), b"partial").unwrap();
    std::fs::write(store.dir().join("notes.txt"), b"x").unwrap();

    assert!(store.list().unwrap().is_empty());
    assert!(matches!(store.latest(), Err(BackupError::NoBackups)));
  }

  #[test]
  fn unreadable_files_are_skipped() {
    let temp = seeded_tree();
    let store = BackupStore::new(temp.path(), 3);
    let mut snapshot = build_snapshot(temp.path(), &ProtectedPaths::default()).unwrap();
    snapshot.files.get_mut("main.py").unwrap().hash = None;

    let report = store.create(&snapshot, "1.0.0").unwrap();
    assert_eq!(report.archived, 2);
    assert_eq!(report.skipped, vec!["main.py".to_string()]);
  }

  #[test]
  fn version_tags_are_sanitized() {
    assert_eq!(sanitize_version("1.0.0+build/7"), "1.0.0-build-7");
    assert_eq!(sanitize_version(""), "unknown");
    let (version, _) = parse_name("backup_1.0.0-build-7_1700000000000.zip").unwrap();
    assert_eq!(version, "1.0.0-build-7");
  }

  #[test]
  fn prune_failure_after_create_only_warns() {
    let temp = TempDir::new().unwrap();
    let not_a_dir = temp.path().join("backups");
    std::fs::write(&not_a_dir, b"").unwrap();
    let store = BackupStore {
      root: temp.path().to_path_buf(),
      dir: not_a_dir,
      retention: 1,
    };

    assert!(matches!(store.prune(), Err(BackupError::List { .. })));
    assert!(store.prune_after_create().is_empty());
  }

  #[test]
  #[cfg(unix)]
  fn create_succeeds_when_the_backup_dir_cannot_be_listed() {
    use std::os::unix::fs::PermissionsExt;

    let temp = seeded_tree();
    let store = BackupStore::new(temp.path(), 1);
    let snapshot = build_snapshot(temp.path(), &ProtectedPaths::default()).unwrap();
    store.create(&snapshot, "1.0.0").unwrap();

    let dir = backup_dir(temp.path());
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o300)).unwrap();
    let report = store.create(&snapshot, "1.1.0");
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

    let report = report.unwrap();
    assert!(report.backup.path.is_file());
  }
}
