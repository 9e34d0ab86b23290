//! Test utilities for upkeep-lib.
//!
//! Helpers to lay out install trees and build manifests without going
//! through the network.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::download::{ContentCache, DownloadManager, FetchStrategy, StrategyError};
use crate::manifest::{FileEntry, Manifest, RestartClass};
use crate::util::hash::hash_bytes;

/// Write `content` at `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, content: &[u8]) {
  let path = root.join(relative);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, content).unwrap();
}

/// Build a file entry whose hash and size describe `content`.
pub fn entry(path: &str, content: &[u8], class: RestartClass, url: &str) -> FileEntry {
  FileEntry {
    path: path.to_string(),
    size: content.len() as u64,
    hash: hash_bytes(content),
    source_url: url.to_string(),
    restart_class: class,
  }
}

/// Build a manifest from `(path, content, class)` triples, with URLs under `base_url`.
pub fn manifest(version: &str, files: &[(&str, &[u8], RestartClass)], base_url: &str) -> Manifest {
  let structure: BTreeMap<String, FileEntry> = files
    .iter()
    .map(|(path, content, class)| {
      let url = format!("{}/{}", base_url.trim_end_matches('/'), path);
      (path.to_string(), entry(path, content, *class, &url))
    })
    .collect();

  Manifest {
    version: version.to_string(),
    structure,
    update_strategy: "progressive".to_string(),
    force_update: false,
    minimum_version: None,
    update_id: None,
    changelog: None,
    release_date: None,
  }
}

/// Serves bytes by manifest path without touching the network. Unknown
/// paths fail like an unreachable host.
pub struct MapStrategy {
  files: HashMap<String, Vec<u8>>,
}

impl MapStrategy {
  pub fn new(files: &[(&str, &[u8])]) -> Self {
    Self {
      files: files.iter().map(|(p, c)| (p.to_string(), c.to_vec())).collect(),
    }
  }
}

#[async_trait]
impl FetchStrategy for MapStrategy {
  fn name(&self) -> &'static str {
    "map"
  }

  async fn fetch(&self, entry: &FileEntry, dest: &Path) -> Result<(), StrategyError> {
    let bytes = self
      .files
      .get(&entry.path)
      .ok_or(StrategyError::Unavailable("not served"))?;
    tokio::fs::write(dest, bytes).await.map_err(|source| StrategyError::Io {
      path: dest.to_path_buf(),
      source,
    })
  }
}

/// Download manager backed by a [`MapStrategy`], caching under `cache_dir`.
pub fn offline_downloads(cache_dir: &Path, files: &[(&str, &[u8])]) -> DownloadManager {
  DownloadManager::with_strategies(vec![Arc::new(MapStrategy::new(files))], ContentCache::new(cache_dir))
}
