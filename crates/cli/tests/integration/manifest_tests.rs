use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn generate_writes_a_valid_manifest() {
  let env = TestEnv::new();
  env.release_file("main.py", "print('hi')");
  env.release_file("bin/app.exe", "MZ");
  env.release_file("__pycache__/main.cpython-312.pyc", "x");
  env.publish("2.0.0");

  let manifest: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(env.manifest_path()).unwrap()).unwrap();
  assert_eq!(manifest["version"], "2.0.0");
  assert_eq!(manifest["update_strategy"], "progressive");

  let structure = manifest["structure"].as_object().unwrap();
  assert_eq!(structure.len(), 2);
  assert_eq!(structure["bin/app.exe"]["type"], "hard");
  assert_eq!(structure["main.py"]["size"], 11);

  env
    .upkeep_cmd()
    .args(["manifest", "validate"])
    .arg(env.manifest_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("is valid"));
}

#[test]
fn validate_rejects_missing_required_field() {
  let env = TestEnv::new();
  let path = env.temp.path().join("broken.json");
  std::fs::write(&path, r#"{"version": "1.0.0", "structure": {}}"#).unwrap();

  env
    .upkeep_cmd()
    .args(["manifest", "validate"])
    .arg(&path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("update_strategy"));
}

#[test]
fn generate_prints_to_stdout_without_out() {
  let env = TestEnv::new();
  env.release_file("a.py", "a");

  env
    .upkeep_cmd()
    .args(["manifest", "generate"])
    .arg(env.release_root())
    .args(["--version", "1.0.0", "--base-url", "https://example.com/app"])
    .assert()
    .success()
    .stdout(predicate::str::contains("https://example.com/app/a.py"));
}
