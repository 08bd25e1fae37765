//! Build, publish and rollback through the CLI.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn build_publishes_course() {
  let env = TestEnv::with_course("");

  env
    .cp_cmd()
    .args(["build", "c1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Published c1 version 0000000001"));

  let chapter = std::fs::read_to_string(env.live_path().join("m1/ch1.html")).unwrap();
  assert_eq!(chapter, "<p>chapter one</p>");
}

#[test]
fn no_publish_defers_until_publish() {
  let env = TestEnv::with_course("");

  env
    .cp_cmd()
    .args(["build", "c1", "--no-publish"])
    .assert()
    .success()
    .stdout(predicate::str::contains("publish pending"));
  assert!(!env.live_path().exists());

  env
    .cp_cmd()
    .args(["publish", "c1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Published c1 version 0000000001"));
  assert!(env.live_path().join("index.yaml").exists());

  // Publishing the live version again is a no-op success.
  env.cp_cmd().args(["publish", "c1", "--version", "1"]).assert().success();
}

#[test]
fn invalid_course_fails_and_keeps_log() {
  let env = TestEnv::with_course("");
  env.write_file("source/index.yaml", "name: Broken\nmodules: [{key: m1, name: Round}]\n");

  env
    .cp_cmd()
    .args(["build", "c1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("ended FAILED"));

  env
    .cp_cmd()
    .args(["log", "c1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Build failed"));
  assert!(!env.live_path().exists());
}

#[test]
fn status_reports_live_version() {
  let env = TestEnv::with_course("");
  env.cp_cmd().args(["build", "c1"]).assert().success();

  let output = env.cp_cmd().args(["status", "c1", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(status["state"], "idle");
  assert_eq!(status["latest"]["state"], "PUBLISHED");
  assert_eq!(status["published"]["version_id"], 1);
}

#[test]
fn rollback_restores_previous_version() {
  let env = TestEnv::with_course("");
  env.cp_cmd().args(["build", "c1"]).assert().success();
  env.write_file("source/m1/ch1.html", "<p>chapter two</p>");
  env.cp_cmd().args(["build", "c1"]).assert().success();

  env
    .cp_cmd()
    .args(["rollback", "c1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("back at version 0000000001"));

  let chapter = std::fs::read_to_string(env.live_path().join("m1/ch1.html")).unwrap();
  assert_eq!(chapter, "<p>chapter one</p>");
}

#[cfg(unix)]
#[test]
fn build_script_runs_before_store() {
  let env = TestEnv::with_course("local");
  env.write_file(
    "source/build.sh",
    "mkdir -p _build/html\necho \"key=$COURSE_KEY\" > _build/html/env.txt\n",
  );

  env.cp_cmd().args(["build", "c1"]).assert().success();

  let written = std::fs::read_to_string(env.live_path().join("_build/html/env.txt")).unwrap();
  assert_eq!(written, "key=c1\n");
}
