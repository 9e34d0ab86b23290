use predicates::prelude::*;

use super::common::TestEnv;

fn release_v1(env: &TestEnv) {
  env.release_file("main.py", "print('v1')");
  env.release_file("lib/helpers.py", "def helper(): pass");
  env.release_file("data/config.json", "{}");
  env.publish("1.0.0");
}

#[test]
fn apply_installs_release_into_empty_root() {
  let env = TestEnv::new();
  release_v1(&env);

  env
    .upkeep_cmd()
    .arg("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("update applied, 3 files updated, 0 failed"));

  assert_eq!(env.read_installed("main.py"), "print('v1')");
  assert_eq!(env.read_installed("lib/helpers.py"), "def helper(): pass");
  assert!(env.install_root().join("_version.json").exists());
  assert!(!env.install_root().join("_temp_update").exists());
}

#[test]
fn second_apply_is_up_to_date() {
  let env = TestEnv::new();
  release_v1(&env);

  env.upkeep_cmd().arg("apply").assert().success();
  env
    .upkeep_cmd()
    .arg("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("already on latest version (1.0.0)"));
}

#[test]
fn apply_updates_changed_files_and_removes_stale_ones() {
  let env = TestEnv::new();
  release_v1(&env);
  env.upkeep_cmd().arg("apply").assert().success();

  env.install_file("stale.py", "old");
  env.release_file("main.py", "print('v2')");
  env.publish("1.1.0");

  env.upkeep_cmd().arg("apply").assert().success();

  assert_eq!(env.read_installed("main.py"), "print('v2')");
  assert!(!env.install_root().join("stale.py").exists());
  assert_eq!(env.read_installed("data/config.json"), "{}");
}

#[test]
fn apply_json_reports_outcome() {
  let env = TestEnv::new();
  release_v1(&env);

  let output = env.upkeep_cmd().args(["apply", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(outcome["kind"], "applied");
  assert_eq!(outcome["success"], true);
  assert_eq!(outcome["succeeded"], 3);
  assert_eq!(outcome["failed"], 0);
  assert_eq!(outcome["version"], "1.0.0");
}

#[test]
fn no_auto_only_reports_available_update() {
  let env = TestEnv::new();
  env.install_file("main.py", "old");
  release_v1(&env);

  env
    .upkeep_cmd()
    .args(["apply", "--no-auto"])
    .assert()
    .success()
    .stdout(predicate::str::contains("update 1.0.0 available"));

  assert_eq!(env.read_installed("main.py"), "old");
}

#[test]
fn forced_release_applies_with_no_auto() {
  let env = TestEnv::new();
  env.install_file("main.py", "old");
  env.release_file("main.py", "print('v1')");
  env.publish_with("1.0.0", &["--force"]);

  env.upkeep_cmd().args(["apply", "--no-auto"]).assert().success();

  assert_eq!(env.read_installed("main.py"), "print('v1')");
}

#[test]
fn missing_manifest_fails_the_check() {
  let env = TestEnv::new();

  env
    .upkeep_cmd()
    .arg("check")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Update check failed"));

  env
    .upkeep_cmd()
    .arg("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("update check failed, try later"));
}

#[test]
fn check_json_reports_available_update() {
  let env = TestEnv::new();
  release_v1(&env);

  let output = env.upkeep_cmd().args(["check", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let availability: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(availability["status"], "available");
  assert_eq!(availability["version"], "1.0.0");
  assert_eq!(availability["current"], "0.0.0");
  assert_eq!(availability["change"], "upgrade");
  assert_eq!(availability["forced"], false);
}

#[test]
fn plan_lists_changes_without_applying() {
  let env = TestEnv::new();
  env.install_file("main.py", "old");
  env.install_file("obsolete.py", "x");
  release_v1(&env);

  env
    .upkeep_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("+ lib/helpers.py"))
    .stdout(predicate::str::contains("~ main.py"))
    .stdout(predicate::str::contains("- obsolete.py"));

  assert_eq!(env.read_installed("main.py"), "old");
  assert!(env.install_root().join("obsolete.py").exists());
}

#[test]
fn plan_json_is_empty_after_apply() {
  let env = TestEnv::new();
  release_v1(&env);
  env.upkeep_cmd().arg("apply").assert().success();

  let output = env.upkeep_cmd().args(["plan", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(plan["plan"]["add"].as_array().unwrap().len(), 0);
  assert_eq!(plan["plan"]["update"].as_array().unwrap().len(), 0);
  assert_eq!(plan["plan"]["delete"].as_array().unwrap().len(), 0);
}

#[cfg(unix)]
#[test]
fn apply_waits_for_the_install_lock_before_swapping_deferred_files() {
  use upkeep_lib::apply::{PendingReplacements, PendingSwap};
  use upkeep_lib::install_lock::InstallLock;

  let env = TestEnv::new();
  release_v1(&env);
  env.install_file("main.py", "old");
  env.install_file("_pending/main.py", "deferred");
  PendingReplacements::record(&env.install_root(), vec![PendingSwap::for_path("main.py")]).unwrap();

  let held = InstallLock::acquire(&env.install_root(), "apply").unwrap();
  env
    .upkeep_cmd()
    .arg("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("locked"));
  assert_eq!(env.read_installed("main.py"), "old");
  assert!(PendingReplacements::load(&env.install_root()).unwrap().is_some());

  drop(held);
  env.upkeep_cmd().arg("apply").assert().success();
  assert_eq!(env.read_installed("main.py"), "print('v1')");
}
