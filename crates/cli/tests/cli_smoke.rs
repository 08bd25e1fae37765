//! CLI smoke tests for coursepress.
//!
//! These tests verify that every command parses, runs against an empty data
//! root without panicking and returns the expected exit code.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the coursepress binary.
fn cp_cmd() -> Command {
  cargo_bin_cmd!("coursepress")
}

/// A temp directory with a settings file rooted inside it.
fn temp_settings() -> TempDir {
  let temp = TempDir::new().unwrap();
  let root = temp.path().join("data");
  std::fs::write(
    temp.path().join("coursepress.toml"),
    format!("root = {:?}\n\n[[courses]]\nkey = \"c1\"\n", root.display().to_string()),
  )
  .unwrap();
  temp
}

fn cp_in(temp: &TempDir) -> Command {
  let mut cmd = cp_cmd();
  cmd.arg("--config").arg(temp.path().join("coursepress.toml"));
  cmd.env_remove("COURSEPRESS_ROOT");
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cp_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  cp_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("coursepress"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "publish", "status", "log", "rollback", "gc"] {
    cp_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

#[test]
fn command_requires_image() {
  cp_cmd()
    .args(["build", "c1", "--command", "make"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--image"));
}

// =============================================================================
// Empty data root
// =============================================================================

#[test]
#[serial]
fn status_of_unbuilt_course_is_idle() {
  let temp = temp_settings();

  cp_in(&temp)
    .args(["status", "c1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("c1: idle"));
}

#[test]
#[serial]
fn status_json_is_parseable() {
  let temp = temp_settings();

  let output = cp_in(&temp).args(["status", "c1", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value["course_key"], "c1");
  assert_eq!(value["state"], "idle");
  assert!(value["published"].is_null());
}

#[test]
#[serial]
fn publish_without_builds_fails() {
  let temp = temp_settings();

  cp_in(&temp)
    .args(["publish", "c1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("nothing stored or published"));
}

#[test]
#[serial]
fn build_without_source_fails() {
  let temp = temp_settings();

  cp_in(&temp)
    .args(["build", "c1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no source configured and nothing deposited"));
}

#[test]
#[serial]
fn rollback_without_history_fails() {
  let temp = temp_settings();

  cp_in(&temp).args(["rollback", "c1"]).assert().failure();
}

#[test]
#[serial]
fn log_without_builds_fails() {
  let temp = temp_settings();

  cp_in(&temp)
    .args(["log", "c1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no builds recorded"));
}

#[test]
#[serial]
fn gc_on_empty_root_succeeds() {
  let temp = temp_settings();

  cp_in(&temp)
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn invalid_course_key_fails() {
  let temp = temp_settings();

  cp_in(&temp)
    .args(["status", "../etc"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid course key"));
}

#[test]
fn invalid_settings_file_fails() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("coursepress.toml"), "root = [").unwrap();

  cp_in(&temp)
    .args(["status"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load settings"));
}
