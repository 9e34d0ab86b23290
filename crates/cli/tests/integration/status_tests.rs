use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn status_before_first_update() {
  let env = TestEnv::new();

  env
    .upkeep_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("No version recorded"));
}

#[test]
fn status_after_apply_shows_version() {
  let env = TestEnv::new();
  env.release_file("main.py", "v1");
  env.publish("1.0.0");
  env.upkeep_cmd().arg("apply").assert().success();

  let output = env.upkeep_cmd().args(["status", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(status["version"]["version"], "1.0.0");
  assert_eq!(status["pending"].as_array().unwrap().len(), 0);
  assert!(status["locked_by"].is_null());
}

#[test]
fn finish_pending_swaps_deferred_files() {
  let env = TestEnv::new();
  env.install_file("app.exe", "old");
  env.install_file("_pending/app.exe", "new");
  env.install_file(
    "_pending_replacements.json",
    r#"{"created_at": "2024-01-15T10:00:00Z", "swaps": [{"source": "_pending/app.exe", "destination": "app.exe"}]}"#,
  );

  env
    .upkeep_cmd()
    .arg("status")
    .assert()
    .success()
    .stderr(predicate::str::contains("app.exe"));

  env
    .upkeep_cmd()
    .arg("finish-pending")
    .assert()
    .success()
    .stdout(predicate::str::contains("Swapped in app.exe"));

  assert_eq!(env.read_installed("app.exe"), "new");
  assert!(!env.install_root().join("_pending_replacements.json").exists());

  env
    .upkeep_cmd()
    .arg("finish-pending")
    .assert()
    .success()
    .stdout(predicate::str::contains("No deferred swaps"));
}
