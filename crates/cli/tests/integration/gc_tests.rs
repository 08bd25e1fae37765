//! Garbage collection through the CLI.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn gc_removes_abandoned_staging() {
  let env = TestEnv::with_course("");
  env.cp_cmd().args(["build", "c1"]).assert().success();
  let abandoned = env.root_path().join("staging/c1/0000000009");
  std::fs::create_dir_all(&abandoned).unwrap();

  let output = env.cp_cmd().args(["gc", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(result["stats"]["trees_removed"], 1);
  assert!(!abandoned.exists());
  assert!(env.live_path().exists());
}

#[test]
fn gc_text_output() {
  let env = TestEnv::with_course("");

  env
    .cp_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Trees removed: 0"));
}
