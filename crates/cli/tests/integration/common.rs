//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

pub const INDEX: &str = r#"
name: Test course
categories:
  chapter: {name: Chapters}
modules:
  - key: m1
    name: Round 1
    status: ready
    children:
      - key: ch1
        category: chapter
        static_content: m1/ch1.html
"#;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the settings file, the
/// course source and the data root.
pub struct TestEnv {
  pub temp: TempDir,
  pub settings_path: PathBuf,
}

impl TestEnv {
  /// A course `c1` whose source is a valid, already built course.
  ///
  /// An empty `default_image` skips the build step.
  pub fn with_course(default_image: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let settings_path = temp.path().join("coursepress.toml");
    let env = Self { temp, settings_path };

    env.write_file("source/index.yaml", INDEX);
    env.write_file("source/m1/ch1.html", "<p>chapter one</p>");
    let settings = format!(
      "root = {:?}\ndefault_image = {:?}\n\n[[courses]]\nkey = \"c1\"\nsource = {:?}\n",
      env.root_path().display().to_string(),
      default_image,
      env.source_path().display().to_string(),
    );
    std::fs::write(&env.settings_path, settings).unwrap();
    env
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn source_path(&self) -> PathBuf {
    let p = self.temp.path().join("source");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Data root (isolated per test).
  pub fn root_path(&self) -> PathBuf {
    let p = self.temp.path().join("data");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn live_path(&self) -> PathBuf {
    self.root_path().join("publish").join("c1")
  }

  /// Get a pre-configured Command for the coursepress binary.
  pub fn cp_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("coursepress");
    cmd.arg("--config").arg(&self.settings_path);
    cmd.env_remove("COURSEPRESS_ROOT");
    cmd
  }
}
