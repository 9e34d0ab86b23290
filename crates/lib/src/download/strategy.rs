//! Download transports.
//!
//! Each strategy knows one way of getting a file's bytes onto disk. None of
//! them verify content; the manager hashes whatever a strategy produced and
//! moves on to the next one on mismatch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::RepositoryCoordinates;
use crate::manifest::FileEntry;

#[derive(Debug, Error)]
pub enum StrategyError {
  #[error("request to {url} timed out")]
  Timeout { url: String },

  #[error("request to {url} failed: {source}")]
  Http {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("could not decode content from {url}: {reason}")]
  Decode { url: String, reason: String },

  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("strategy unavailable: {0}")]
  Unavailable(&'static str),
}

impl StrategyError {
  fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
    if source.is_timeout() {
      StrategyError::Timeout { url: url.to_string() }
    } else {
      StrategyError::Http {
        url: url.to_string(),
        source,
      }
    }
  }

  fn io(path: &Path, source: std::io::Error) -> Self {
    StrategyError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// One transport in the fallback chain.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
  /// Short name used in logs and progress events.
  fn name(&self) -> &'static str;

  /// Write the bytes for `entry` to `dest`.
  async fn fetch(&self, entry: &FileEntry, dest: &Path) -> Result<(), StrategyError>;
}

async fn get_bytes(client: &Client, url: &str) -> Result<Vec<u8>, StrategyError> {
  let response = client
    .get(url)
    .send()
    .await
    .map_err(|e| StrategyError::from_reqwest(url, e))?;

  if !response.status().is_success() {
    return Err(StrategyError::Status {
      url: url.to_string(),
      status: response.status().as_u16(),
    });
  }

  let bytes = response.bytes().await.map_err(|e| StrategyError::from_reqwest(url, e))?;
  Ok(bytes.to_vec())
}

async fn write_dest(dest: &Path, bytes: &[u8]) -> Result<(), StrategyError> {
  fs::write(dest, bytes).await.map_err(|e| StrategyError::io(dest, e))
}

/// Plain GET of the entry's `source_url`.
#[derive(Debug, Clone)]
pub struct DirectStrategy {
  client: Client,
}

impl DirectStrategy {
  pub fn new(client: Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl FetchStrategy for DirectStrategy {
  fn name(&self) -> &'static str {
    "direct"
  }

  async fn fetch(&self, entry: &FileEntry, dest: &Path) -> Result<(), StrategyError> {
    // Local release trees are published as `file://` URLs.
    if let Some(path) = entry.source_url.strip_prefix("file://") {
      let source = Path::new(path);
      fs::copy(source, dest).await.map_err(|e| StrategyError::io(source, e))?;
      return Ok(());
    }

    let bytes = get_bytes(&self.client, &entry.source_url).await?;
    write_dest(dest, &bytes).await
  }
}

/// GET through the CDN mirror of the published repository.
#[derive(Debug, Clone)]
pub struct MirrorStrategy {
  client: Client,
  coords: RepositoryCoordinates,
}

impl MirrorStrategy {
  pub fn new(client: Client, coords: RepositoryCoordinates) -> Self {
    Self { client, coords }
  }
}

#[async_trait]
impl FetchStrategy for MirrorStrategy {
  fn name(&self) -> &'static str {
    "mirror"
  }

  async fn fetch(&self, entry: &FileEntry, dest: &Path) -> Result<(), StrategyError> {
    if !self.coords.is_configured() {
      return Err(StrategyError::Unavailable("no repository configured for the mirror"));
    }
    let url = self.coords.mirror_url(&entry.path);
    let bytes = get_bytes(&self.client, &url).await?;
    write_dest(dest, &bytes).await
  }
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
  #[serde(default)]
  content: String,
  #[serde(default)]
  encoding: String,
  #[serde(default)]
  download_url: Option<String>,
}

/// GET through the hosting service's content API, which wraps the file in a
/// JSON document with base64 content.
#[derive(Debug, Clone)]
pub struct ContentApiStrategy {
  client: Client,
  coords: RepositoryCoordinates,
}

impl ContentApiStrategy {
  pub fn new(client: Client, coords: RepositoryCoordinates) -> Self {
    Self { client, coords }
  }
}

#[async_trait]
impl FetchStrategy for ContentApiStrategy {
  fn name(&self) -> &'static str {
    "content-api"
  }

  async fn fetch(&self, entry: &FileEntry, dest: &Path) -> Result<(), StrategyError> {
    if !self.coords.is_configured() {
      return Err(StrategyError::Unavailable("no repository configured for the content API"));
    }
    let url = self.coords.content_api_url(&entry.path);

    let response = self
      .client
      .get(&url)
      .header(header::ACCEPT, "application/vnd.github.v3+json")
      .send()
      .await
      .map_err(|e| StrategyError::from_reqwest(&url, e))?;

    if !response.status().is_success() {
      return Err(StrategyError::Status {
        url,
        status: response.status().as_u16(),
      });
    }

    let body: ContentResponse = response.json().await.map_err(|e| StrategyError::Decode {
      url: url.clone(),
      reason: e.to_string(),
    })?;

    // Large files come back without inline content.
    if body.content.is_empty() {
      let Some(download_url) = body.download_url else {
        return Err(StrategyError::Decode {
          url,
          reason: "response has neither content nor download_url".to_string(),
        });
      };
      let bytes = get_bytes(&self.client, &download_url).await?;
      return write_dest(dest, &bytes).await;
    }

    if body.encoding != "base64" {
      return Err(StrategyError::Decode {
        url,
        reason: format!("unsupported encoding '{}'", body.encoding),
      });
    }

    let compact: String = body.content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| StrategyError::Decode {
      url: url.clone(),
      reason: e.to_string(),
    })?;

    write_dest(dest, &bytes).await
  }
}

/// Chunked GET that keeps partial progress in `<partial_dir>/<hash>.part`
/// and resumes from the last received byte on the next attempt.
#[derive(Debug, Clone)]
pub struct ResumableStrategy {
  client: Client,
  partial_dir: PathBuf,
}

impl ResumableStrategy {
  pub fn new(client: Client, partial_dir: PathBuf) -> Self {
    Self { client, partial_dir }
  }

  pub fn part_path(&self, entry: &FileEntry) -> PathBuf {
    self.partial_dir.join(format!("{}.part", entry.hash))
  }
}

#[async_trait]
impl FetchStrategy for ResumableStrategy {
  fn name(&self) -> &'static str {
    "resumable"
  }

  async fn fetch(&self, entry: &FileEntry, dest: &Path) -> Result<(), StrategyError> {
    fs::create_dir_all(&self.partial_dir)
      .await
      .map_err(|e| StrategyError::io(&self.partial_dir, e))?;

    let part = self.part_path(entry);
    let have = match fs::metadata(&part).await {
      Ok(meta) => meta.len(),
      Err(_) => 0,
    };

    let url = &entry.source_url;
    let mut request = self.client.get(url);
    if have > 0 {
      debug!(path = %entry.path, offset = have, "resuming partial download");
      request = request.header(header::RANGE, format!("bytes={have}-"));
    }

    let mut response = request.send().await.map_err(|e| StrategyError::from_reqwest(url, e))?;

    let append = match response.status() {
      StatusCode::PARTIAL_CONTENT => true,
      StatusCode::RANGE_NOT_SATISFIABLE if have > 0 => {
        debug!(path = %entry.path, "partial download already complete");
        return fs::rename(&part, dest).await.map_err(|e| StrategyError::io(dest, e));
      }
      status if status.is_success() => false,
      status => {
        return Err(StrategyError::Status {
          url: url.clone(),
          status: status.as_u16(),
        });
      }
    };

    let mut file = fs::OpenOptions::new()
      .create(true)
      .write(true)
      .append(append)
      .truncate(!append)
      .open(&part)
      .await
      .map_err(|e| StrategyError::io(&part, e))?;

    while let Some(chunk) = response.chunk().await.map_err(|e| StrategyError::from_reqwest(url, e))? {
      file.write_all(&chunk).await.map_err(|e| StrategyError::io(&part, e))?;
    }
    file.flush().await.map_err(|e| StrategyError::io(&part, e))?;
    drop(file);

    fs::rename(&part, dest).await.map_err(|e| StrategyError::io(dest, e))
  }
}
