//! Content-addressed download cache.
//!
//! Verified downloads are stored as `<cache>/<hash>`, so identical bytes
//! reached through a different path or URL are served locally. Entries are
//! re-verified on every lookup and dropped if corrupt.
//!
//! # Layout
//!
//! ```text
//! _update_cache/
//! ├── <sha256>              # Verified content
//! └── partial/
//!     └── <sha256>.part     # In-progress resumable downloads
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::util::hash::{ContentHash, hash_file_async};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
  move |source| CacheError::Io {
    path: path.to_path_buf(),
    source,
  }
}

#[derive(Debug, Clone)]
pub struct ContentCache {
  dir: PathBuf,
}

impl ContentCache {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Directory for resumable partial downloads.
  pub fn partial_dir(&self) -> PathBuf {
    self.dir.join("partial")
  }

  pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
    self.dir.join(hash.as_str())
  }

  /// Return the cached file for `hash`, if present and intact.
  pub async fn lookup(&self, hash: &ContentHash) -> Option<PathBuf> {
    let path = self.path_for(hash);
    if !fs::try_exists(&path).await.unwrap_or(false) {
      return None;
    }

    match hash_file_async(&path).await {
      Ok(actual) if actual == *hash => {
        debug!(hash = %hash, "cache hit");
        Some(path)
      }
      Ok(actual) => {
        warn!(expected = %hash, actual = %actual, "discarding corrupt cache entry");
        let _ = fs::remove_file(&path).await;
        None
      }
      Err(e) => {
        warn!(hash = %hash, error = %e, "cache entry unreadable");
        None
      }
    }
  }

  /// Copy a verified file into the cache under `hash`.
  pub async fn insert(&self, hash: &ContentHash, source: &Path) -> Result<PathBuf, CacheError> {
    fs::create_dir_all(&self.dir).await.map_err(io_err(&self.dir))?;

    let dest = self.path_for(hash);
    if fs::try_exists(&dest).await.unwrap_or(false) {
      return Ok(dest);
    }

    let temp = self.dir.join(format!("{hash}.tmp"));
    fs::copy(source, &temp).await.map_err(io_err(&temp))?;
    if let Err(e) = fs::rename(&temp, &dest).await {
      let _ = fs::remove_file(&temp).await;
      return Err(io_err(&dest)(e));
    }

    debug!(hash = %hash, "cached");
    Ok(dest)
  }

  /// Remove every cached entry and partial download.
  pub async fn clear(&self) -> Result<(), CacheError> {
    match fs::remove_dir_all(&self.dir).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(io_err(&self.dir)(e)),
    }
  }
}
