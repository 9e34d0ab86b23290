//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets an install root, a release tree published through
/// `file://` URLs and its own config directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    for dir in ["install", "release", "config"] {
      std::fs::create_dir_all(env.temp.path().join(dir)).unwrap();
    }
    env
  }

  fn canonical(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn install_root(&self) -> PathBuf {
    self.canonical("install")
  }

  pub fn release_root(&self) -> PathBuf {
    self.canonical("release")
  }

  pub fn manifest_path(&self) -> PathBuf {
    self.temp.path().join("manifest.json")
  }

  /// Write a file into the install tree.
  pub fn install_file(&self, relative: &str, content: &str) {
    write(&self.install_root(), relative, content);
  }

  /// Write a file into the release tree.
  pub fn release_file(&self, relative: &str, content: &str) {
    write(&self.release_root(), relative, content);
  }

  pub fn read_installed(&self, relative: &str) -> String {
    std::fs::read_to_string(self.install_root().join(relative)).unwrap()
  }

  /// Generate the manifest for the release tree, with extra CLI args.
  pub fn publish_with(&self, version: &str, extra: &[&str]) {
    let base_url = format!("file://{}", self.release_root().display());
    self
      .upkeep_cmd()
      .args(["manifest", "generate"])
      .arg(self.release_root())
      .args(["--version", version, "--base-url", &base_url, "--out"])
      .arg(self.manifest_path())
      .args(extra)
      .assert()
      .success();
  }

  pub fn publish(&self, version: &str) {
    self.publish_with(version, &[]);
  }

  /// Get a pre-configured Command for the upkeep binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `UPKEEP_INSTALL_ROOT`: the test install tree
  /// - `UPKEEP_MANIFEST_URL`: `file://` URL of the published manifest
  /// - `XDG_CONFIG_HOME` / `APPDATA`: isolated config lookup
  pub fn upkeep_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("upkeep");
    cmd.env("UPKEEP_INSTALL_ROOT", self.install_root());
    cmd.env("UPKEEP_MANIFEST_URL", format!("file://{}", self.manifest_path().display()));
    cmd.env("XDG_CONFIG_HOME", self.canonical("config"));
    cmd.env("APPDATA", self.canonical("config"));
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

fn write(root: &Path, relative: &str, content: &str) {
  let path = root.join(relative);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}
