use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn list_without_backups() {
  let env = TestEnv::new();

  env
    .upkeep_cmd()
    .args(["backup", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No backups found"));
}

#[test]
fn apply_leaves_a_backup_of_the_previous_tree() {
  let env = TestEnv::new();
  env.install_file("main.py", "before");
  env.release_file("main.py", "after");
  env.publish("1.0.0");

  env.upkeep_cmd().arg("apply").assert().success();

  let output = env.upkeep_cmd().args(["backup", "list", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let backups: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let backups = backups.as_array().unwrap();
  assert_eq!(backups.len(), 1);
  assert_eq!(backups[0]["version"], "0.0.0");
}

#[test]
fn create_then_restore_latest() {
  let env = TestEnv::new();
  env.install_file("main.py", "original");
  env.install_file("lib/util.py", "util");

  env
    .upkeep_cmd()
    .args(["backup", "create"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Created backup_0.0.0_"));

  env.install_file("main.py", "modified");

  env
    .upkeep_cmd()
    .args(["backup", "restore", "--force"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Restored 2 files"));

  assert_eq!(env.read_installed("main.py"), "original");
}

#[test]
fn restore_without_force_refuses_non_interactive() {
  let env = TestEnv::new();
  env.install_file("main.py", "original");
  env.upkeep_cmd().args(["backup", "create"]).assert().success();

  env
    .upkeep_cmd()
    .args(["backup", "restore"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));
}

#[test]
fn restore_unknown_backup_fails() {
  let env = TestEnv::new();

  env
    .upkeep_cmd()
    .args(["backup", "restore", "backup_9.9.9_1.zip", "--force"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("backup not found"));
}
