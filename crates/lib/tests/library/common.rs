//! Shared helpers: a mock release server and a recording host.

use std::path::Path;
use std::sync::{Arc, Mutex};

use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;
use tempfile::TempDir;

use upkeep_lib::config::{RepositoryCoordinates, UpdaterConfig};
use upkeep_lib::reload::ModuleRegistry;
use upkeep_lib::session::{ProgressEvent, UpdateHost, UpdateSession};
use upkeep_lib::util::hash::hash_bytes;

pub const OWNER: &str = "acme";
pub const REPO: &str = "app";

#[derive(Default)]
pub struct TestHost {
  pub version: String,
  pub messages: Mutex<Vec<String>>,
  pub events: Mutex<Vec<ProgressEvent>>,
}

impl UpdateHost for TestHost {
  fn current_version(&self) -> String {
    self.version.clone()
  }

  fn notify(&self, message: &str) {
    self.messages.lock().unwrap().push(message.to_string());
  }

  fn progress(&self, event: &ProgressEvent) {
    self.events.lock().unwrap().push(event.clone());
  }
}

/// A mock repository serving a manifest and its files.
pub struct Release {
  pub server: ServerGuard,
  mocks: Vec<Mock>,
}

impl Release {
  pub async fn start() -> Self {
    Self {
      server: mockito::Server::new_async().await,
      mocks: Vec::new(),
    }
  }

  pub fn coords(&self) -> RepositoryCoordinates {
    RepositoryCoordinates {
      owner: OWNER.to_string(),
      repo: REPO.to_string(),
      branch: "main".to_string(),
      raw_base: self.server.url(),
      mirror_base: self.server.url(),
      api_base: self.server.url(),
    }
  }

  /// Publish a manifest listing `files` with their real hashes. URLs are
  /// left out so they default to the raw repository layout.
  pub async fn publish_manifest(&mut self, version: &str, files: &[(&str, &[u8])]) {
    let structure: serde_json::Map<String, serde_json::Value> = files
      .iter()
      .map(|(path, content)| {
        (
          path.to_string(),
          json!({ "size": content.len(), "hash": hash_bytes(content).0 }),
        )
      })
      .collect();
    let body = json!({
      "version": version,
      "update_strategy": "progressive",
      "structure": structure,
    });

    let mock = self
      .server
      .mock("GET", "/acme/app/main/update_system/manifest.json")
      .with_status(200)
      .with_body(body.to_string())
      .create_async()
      .await;
    self.mocks.push(mock);
  }

  /// Serve `content` for `path` on the direct (and resumable) URL.
  pub async fn serve_raw(&mut self, path: &str, content: &[u8]) {
    let mock = self
      .server
      .mock("GET", format!("/acme/app/main/{path}").as_str())
      .with_status(200)
      .with_body(content)
      .create_async()
      .await;
    self.mocks.push(mock);
  }

  pub async fn serve_mirror(&mut self, path: &str, content: &[u8]) {
    let mock = self
      .server
      .mock("GET", format!("/gh/acme/app@main/{path}").as_str())
      .with_status(200)
      .with_body(content)
      .create_async()
      .await;
    self.mocks.push(mock);
  }

  pub async fn serve_content_api(&mut self, path: &str, content: &[u8]) {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(content);
    let mock = self
      .server
      .mock("GET", format!("/repos/acme/app/contents/{path}").as_str())
      .match_query(Matcher::Any)
      .with_status(200)
      .with_body(json!({ "content": encoded, "encoding": "base64" }).to_string())
      .create_async()
      .await;
    self.mocks.push(mock);
  }

  pub fn session(&self, root: &Path, host: Arc<TestHost>) -> UpdateSession {
    let config = UpdaterConfig {
      install_root: Some(root.to_path_buf()),
      repository: self.coords(),
      manifest_timeout_secs: 5,
      download_timeout_secs: 5,
      ..Default::default()
    };
    UpdateSession::new(config, host, Arc::new(ModuleRegistry::new())).unwrap()
  }
}

pub fn install_tree(files: &[(&str, &[u8])]) -> TempDir {
  let temp = TempDir::new().unwrap();
  for (path, content) in files {
    let full = temp.path().join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
  }
  temp
}

pub fn host(version: &str) -> Arc<TestHost> {
  Arc::new(TestHost {
    version: version.to_string(),
    ..Default::default()
  })
}
