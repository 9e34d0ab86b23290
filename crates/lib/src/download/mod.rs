//! Download manager: fallback chain, integrity gate and cache.
//!
//! For every file the cache is consulted first. On a miss each strategy is
//! tried in order; whatever a strategy writes is hashed and discarded on
//! mismatch before the next strategy runs. Running out of strategies is a
//! definitive failure for that file, never a retry loop.

mod cache;
mod strategy;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub use cache::{CacheError, ContentCache};
pub use strategy::{
  ContentApiStrategy, DirectStrategy, FetchStrategy, MirrorStrategy, ResumableStrategy, StrategyError,
};

use crate::config::RepositoryCoordinates;
use crate::manifest::FileEntry;
use crate::util::hash::{ContentHash, hash_file_async};

#[derive(Debug, Error)]
pub enum DownloadError {
  #[error("{path}: content hash mismatch via {strategy} (expected {expected}, got {actual})")]
  IntegrityMismatch {
    path: String,
    strategy: &'static str,
    expected: ContentHash,
    actual: ContentHash,
  },

  #[error("{path}: all download strategies failed ({})", .attempts.join("; "))]
  Exhausted { path: String, attempts: Vec<String> },

  #[error("failed to prepare {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),

  #[error("{path}: download task aborted")]
  Aborted { path: String },
}

/// Where a file's verified bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  Cache,
  Strategy(&'static str),
}

/// Result of one file in [`DownloadManager::fetch_all`].
#[derive(Debug)]
pub struct StagedDownload {
  pub entry: FileEntry,
  pub result: Result<(PathBuf, FetchSource), DownloadError>,
}

#[derive(Clone)]
pub struct DownloadManager {
  strategies: Arc<Vec<Arc<dyn FetchStrategy>>>,
  cache: ContentCache,
}

impl std::fmt::Debug for DownloadManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DownloadManager")
      .field("strategies", &self.strategy_names())
      .field("cache", &self.cache)
      .finish()
  }
}

impl DownloadManager {
  /// Default chain: direct, mirror, content API, resumable.
  pub fn new(coords: &RepositoryCoordinates, cache: ContentCache, timeout: Duration) -> Result<Self, DownloadError> {
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(concat!("upkeep/", env!("CARGO_PKG_VERSION")))
      .build()?;

    let strategies: Vec<Arc<dyn FetchStrategy>> = vec![
      Arc::new(DirectStrategy::new(client.clone())),
      Arc::new(MirrorStrategy::new(client.clone(), coords.clone())),
      Arc::new(ContentApiStrategy::new(client.clone(), coords.clone())),
      Arc::new(ResumableStrategy::new(client, cache.partial_dir())),
    ];

    Ok(Self::with_strategies(strategies, cache))
  }

  pub fn with_strategies(strategies: Vec<Arc<dyn FetchStrategy>>, cache: ContentCache) -> Self {
    Self {
      strategies: Arc::new(strategies),
      cache,
    }
  }

  pub fn cache(&self) -> &ContentCache {
    &self.cache
  }

  pub fn strategy_names(&self) -> Vec<&'static str> {
    self.strategies.iter().map(|s| s.name()).collect()
  }

  /// Fetch one file to `dest`, verified against `entry.hash`.
  ///
  /// On failure `dest` does not exist.
  pub async fn fetch(&self, entry: &FileEntry, dest: &Path) -> Result<FetchSource, DownloadError> {
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).await.map_err(|source| DownloadError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    if let Some(cached) = self.cache.lookup(&entry.hash).await {
      fs::copy(&cached, dest).await.map_err(|source| DownloadError::Io {
        path: dest.to_path_buf(),
        source,
      })?;
      debug!(path = %entry.path, "served from cache");
      return Ok(FetchSource::Cache);
    }

    let mut attempts = Vec::new();

    for strategy in self.strategies.iter() {
      let name = strategy.name();
      debug!(path = %entry.path, strategy = name, "attempting download");

      if let Err(e) = strategy.fetch(entry, dest).await {
        warn!(path = %entry.path, strategy = name, error = %e, "download strategy failed");
        attempts.push(format!("{name}: {e}"));
        let _ = fs::remove_file(dest).await;
        continue;
      }

      match self.verify(entry, dest, name).await {
        Ok(()) => {
          if let Err(e) = self.cache.insert(&entry.hash, dest).await {
            warn!(path = %entry.path, error = %e, "failed to cache download");
          }
          info!(path = %entry.path, strategy = name, bytes = entry.size, "downloaded");
          return Ok(FetchSource::Strategy(name));
        }
        Err(e) => {
          warn!(path = %entry.path, strategy = name, error = %e, "discarding download");
          attempts.push(format!("{name}: {e}"));
          let _ = fs::remove_file(dest).await;
        }
      }
    }

    error!(path = %entry.path, attempts = attempts.len(), "download exhausted every strategy");
    Err(DownloadError::Exhausted {
      path: entry.path.clone(),
      attempts,
    })
  }

  async fn verify(&self, entry: &FileEntry, dest: &Path, strategy: &'static str) -> Result<(), DownloadError> {
    let actual = hash_file_async(dest).await.map_err(|e| DownloadError::Io {
      path: dest.to_path_buf(),
      source: e.source,
    })?;

    if actual == entry.hash {
      Ok(())
    } else {
      Err(DownloadError::IntegrityMismatch {
        path: entry.path.clone(),
        strategy,
        expected: entry.hash.clone(),
        actual,
      })
    }
  }

  /// Fetch every entry into `staging/<path>` with at most `parallelism`
  /// transfers in flight.
  ///
  /// Results come back in input order. `on_done` is called on the calling
  /// task as each file finishes, with the number finished so far.
  pub async fn fetch_all(
    &self,
    entries: Vec<FileEntry>,
    staging: &Path,
    parallelism: usize,
    mut on_done: impl FnMut(usize, &FileEntry, bool),
  ) -> Vec<StagedDownload> {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for (index, entry) in entries.iter().cloned().enumerate() {
      let manager = self.clone();
      let semaphore = semaphore.clone();
      let dest = staging.join(&entry.path);

      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire().await else {
          return (index, Err(DownloadError::Aborted { path: entry.path }));
        };
        let result = manager.fetch(&entry, &dest).await.map(|source| (dest, source));
        (index, result)
      });
    }

    let mut results: Vec<Option<Result<(PathBuf, FetchSource), DownloadError>>> =
      entries.iter().map(|_| None).collect();
    let mut finished = 0;

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((index, result)) => {
          finished += 1;
          on_done(finished, &entries[index], result.is_ok());
          results[index] = Some(result);
        }
        Err(e) => error!(error = %e, "download task panicked"),
      }
    }

    entries
      .into_iter()
      .zip(results)
      .map(|(entry, result)| {
        let result = result.unwrap_or_else(|| Err(DownloadError::Aborted { path: entry.path.clone() }));
        StagedDownload { entry, result }
      })
      .collect()
  }
}
