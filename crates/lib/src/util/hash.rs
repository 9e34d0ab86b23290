//! Content hashing for snapshots, cache keys and download verification.
//!
//! Every digest in the engine is a full 64-character lowercase SHA-256 hex
//! string. Manifest hashes are compared case-insensitively.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA-256 digest of a file's bytes.
///
/// Two files with equal `ContentHash` are interchangeable regardless of the
/// path they were reached through.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Normalize a digest taken from an untrusted source (manifest, CLI).
  pub fn parse(raw: &str) -> Self {
    ContentHash(raw.trim().to_ascii_lowercase())
  }

  /// Returns true if `other` names the same digest, ignoring case.
  pub fn matches(&self, other: &str) -> bool {
    self.0.eq_ignore_ascii_case(other.trim())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing a file.
#[derive(Debug, thiserror::Error)]
#[error("failed to read {path}: {source}")]
pub struct HashError {
  pub path: String,
  #[source]
  pub source: std::io::Error,
}

/// Hash a file's contents, streaming it in 8 KiB blocks.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let wrap = |source| HashError {
    path: path.display().to_string(),
    source,
  };

  let mut file = fs::File::open(path).map_err(wrap)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(wrap)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file on the blocking pool.
pub async fn hash_file_async(path: &Path) -> Result<ContentHash, HashError> {
  let owned = path.to_path_buf();
  match tokio::task::spawn_blocking(move || hash_file(&owned)).await {
    Ok(result) => result,
    Err(e) => Err(HashError {
      path: path.display().to_string(),
      source: std::io::Error::other(e),
    }),
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}
