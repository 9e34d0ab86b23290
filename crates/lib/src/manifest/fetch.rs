//! Manifest retrieval and validation.
//!
//! A manifest is either fully trusted or not at all: missing required keys,
//! malformed JSON or an unusable entry reject the whole document. Network
//! failures are reported as errors too; the session turns every error here
//! into "no update information available".

use std::path::{Component, Path};
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RepositoryCoordinates;
use crate::util::hash::ContentHash;

use super::classify::ClassificationTable;
use super::types::{FileEntry, Manifest, WireEntry, WireManifest};

/// Keys every manifest must carry.
pub const REQUIRED_FIELDS: [&str; 3] = ["version", "structure", "update_strategy"];

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("manifest request to {url} failed: {source}")]
  Http {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("manifest request to {url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("failed to read local manifest {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("manifest is not valid JSON: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("manifest is missing required field '{0}'")]
  MissingField(&'static str),

  #[error("manifest entry '{path}' is invalid: {reason}")]
  InvalidEntry { path: String, reason: String },
}

impl ManifestError {
  /// True for connectivity problems, as opposed to a malformed manifest.
  pub fn is_transient(&self) -> bool {
    matches!(self, ManifestError::Http { .. } | ManifestError::Status { .. })
  }
}

/// Fetches the manifest from its endpoint and validates it.
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
  client: Client,
  url: String,
  table: ClassificationTable,
  coords: RepositoryCoordinates,
}

impl ManifestFetcher {
  pub fn new(
    url: impl Into<String>,
    timeout: Duration,
    table: ClassificationTable,
    coords: RepositoryCoordinates,
  ) -> Result<Self, reqwest::Error> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      url: url.into(),
      table,
      coords,
    })
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Retrieve and validate the manifest.
  ///
  /// `file://` URLs are read from disk, everything else goes over HTTP.
  pub async fn fetch(&self) -> Result<Manifest, ManifestError> {
    info!(url = %self.url, "fetching manifest");

    let body = match self.url.strip_prefix("file://") {
      Some(path) => tokio::fs::read(path).await.map_err(|source| ManifestError::Read {
        path: path.to_string(),
        source,
      })?,
      None => self.fetch_http().await?,
    };

    let manifest = parse_manifest(&body, &self.table, &self.coords).inspect_err(|e| {
      warn!(url = %self.url, error = %e, "rejecting manifest");
    })?;

    info!(
      version = %manifest.version,
      files = manifest.structure.len(),
      strategy = %manifest.update_strategy,
      "manifest fetched"
    );
    Ok(manifest)
  }

  async fn fetch_http(&self) -> Result<Vec<u8>, ManifestError> {
    let response = self
      .client
      .get(&self.url)
      .send()
      .await
      .map_err(|source| ManifestError::Http {
        url: self.url.clone(),
        source,
      })?;

    if !response.status().is_success() {
      return Err(ManifestError::Status {
        url: self.url.clone(),
        status: response.status().as_u16(),
      });
    }

    let bytes = response.bytes().await.map_err(|source| ManifestError::Http {
      url: self.url.clone(),
      source,
    })?;
    Ok(bytes.to_vec())
  }
}

/// Parse and validate a manifest body.
pub fn parse_manifest(
  body: &[u8],
  table: &ClassificationTable,
  coords: &RepositoryCoordinates,
) -> Result<Manifest, ManifestError> {
  let value: serde_json::Value = serde_json::from_slice(body)?;

  for field in REQUIRED_FIELDS {
    if value.get(field).is_none_or(|v| v.is_null()) {
      return Err(ManifestError::MissingField(field));
    }
  }

  let wire: WireManifest = serde_json::from_value(value)?;
  from_wire(wire, table, coords)
}

/// Validate a wire manifest and classify each entry.
pub fn from_wire(
  wire: WireManifest,
  table: &ClassificationTable,
  coords: &RepositoryCoordinates,
) -> Result<Manifest, ManifestError> {
  let mut structure = std::collections::BTreeMap::new();

  for (key, raw) in wire.structure {
    let entry = validate_entry(&key, raw, table, coords)?;
    if structure.contains_key(&entry.path) {
      return Err(ManifestError::InvalidEntry {
        path: key,
        reason: format!("duplicates '{}'", entry.path),
      });
    }
    structure.insert(entry.path.clone(), entry);
  }

  debug!(entries = structure.len(), "manifest entries validated");

  Ok(Manifest {
    version: wire.version,
    structure,
    update_strategy: wire.update_strategy,
    force_update: wire.force_update,
    minimum_version: wire.minimum_version,
    update_id: wire.update_id,
    changelog: wire.changelog,
    release_date: wire.release_date,
  })
}

fn validate_entry(
  key: &str,
  raw: WireEntry,
  table: &ClassificationTable,
  coords: &RepositoryCoordinates,
) -> Result<FileEntry, ManifestError> {
  let invalid = |reason: &str| ManifestError::InvalidEntry {
    path: key.to_string(),
    reason: reason.to_string(),
  };

  let path = normalize_relative(key).ok_or_else(|| invalid("path must be relative and stay inside the install root"))?;

  let size = raw.size.ok_or_else(|| invalid("missing size"))?;
  let hash = raw.hash.ok_or_else(|| invalid("missing hash"))?;
  if hash.trim().is_empty() || !hash.trim().chars().all(|c| c.is_ascii_hexdigit()) {
    return Err(invalid("hash must be a hex digest"));
  }

  let source_url = match raw.url {
    Some(url) if !url.trim().is_empty() => url,
    _ if coords.is_configured() => coords.raw_url(&path),
    _ => return Err(invalid("missing url and no repository configured")),
  };

  let restart_class = table.resolve(&path, raw.kind.as_deref());

  Ok(FileEntry {
    path,
    size,
    hash: ContentHash::parse(&hash),
    source_url,
    restart_class,
  })
}

/// Canonical `a/b.py` form of a manifest key, matching snapshot paths.
/// `None` if the key is empty or leaves the install root.
fn normalize_relative(key: &str) -> Option<String> {
  let unified = key.replace('\\', "/");
  let mut parts = Vec::new();
  for component in Path::new(&unified).components() {
    match component {
      Component::Normal(part) => parts.push(part.to_str()?),
      Component::CurDir => {}
      _ => return None,
    }
  }
  if parts.is_empty() { None } else { Some(parts.join("/")) }
}
