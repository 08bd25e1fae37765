//! Shared fixtures for pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use coursepress_lib::fetch::LocalDirFetcher;
use coursepress_lib::grader::LocalGrader;
use coursepress_lib::orchestrator::Orchestrator;
use coursepress_lib::runner::{BuildRequest, BuildRunner, RunOutput, RunnerError};
use coursepress_lib::settings::{CourseSettings, PublishMode, Settings};
use coursepress_lib::types::CourseKey;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const GRADER_URL: &str = "https://grader.example/configure";

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

pub const INDEX_WITH_GRADER: &str = r#"
name: Test course
categories:
  quiz: {name: Quizzes}
modules:
  - key: m1
    name: Round 1
    status: ready
    children:
      - key: q1
        category: quiz
        max_points: 10
        config: exercises/q1
        configure:
          url: https://grader.example/configure
          files: {q1: exercises/q1.yaml}
"#;

/// Writes a marker file into the tree, optionally waiting for a permit first.
pub struct FakeRunner {
  pub exit_code: i32,
  pub gate: Option<Arc<Semaphore>>,
}

impl FakeRunner {
  pub fn ok() -> Self {
    Self { exit_code: 0, gate: None }
  }

  pub fn failing(exit_code: i32) -> Self {
    Self { exit_code, gate: None }
  }

  pub fn gated(gate: Arc<Semaphore>) -> Self {
    Self {
      exit_code: 0,
      gate: Some(gate),
    }
  }
}

#[async_trait]
impl BuildRunner for FakeRunner {
  fn name(&self) -> &'static str {
    "fake"
  }

  async fn run(&self, request: &BuildRequest) -> Result<RunOutput, RunnerError> {
    if let Some(gate) = &self.gate {
      gate.acquire().await.unwrap().forget();
    }
    let out = request.source_path.join("_build/html");
    std::fs::create_dir_all(&out)?;
    std::fs::write(out.join("index.html"), format!("built {}", request.version_id))?;
    Ok(RunOutput {
      exit_code: Some(self.exit_code),
      log: format!("building {}\n", request.course_key),
    })
  }
}

pub struct TestEnv {
  pub temp: TempDir,
  pub key: CourseKey,
  pub grader: Arc<LocalGrader>,
}

impl TestEnv {
  pub fn new(index: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let env = Self {
      temp,
      key: CourseKey::new("c1").unwrap(),
      grader: Arc::new(LocalGrader::new()),
    };
    env.write_source("index.yaml", index);
    env.write_source("m1/ch1.html", "<p>chapter</p>");
    env.write_source("exercises/q1.yaml", "title: Q1\nview_type: access.types.stdasync.acceptFiles\n");
    env
  }

  pub fn root(&self) -> PathBuf {
    self.temp.path().join("data")
  }

  pub fn source(&self) -> PathBuf {
    self.temp.path().join("source")
  }

  pub fn write_source(&self, relative: &str, content: &str) {
    let path = self.source().join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
  }

  pub fn settings(&self, mode: PublishMode) -> Settings {
    let mut settings = Settings::with_root(self.root());
    settings.publish_mode = mode;
    settings.courses.push(CourseSettings {
      key: "c1".to_string(),
      course_id: Some(7),
      source: Some(self.source()),
      publish_mode: None,
    });
    settings
  }

  pub fn orchestrator(&self, runner: FakeRunner, mode: PublishMode) -> Orchestrator {
    let settings = self.settings(mode);
    let fetcher = LocalDirFetcher::from_settings(&settings);
    Orchestrator::new(settings)
      .with_runner(Arc::new(runner))
      .with_fetcher(Arc::new(fetcher))
      .with_grader_transport(self.grader.clone())
  }
}

pub fn read(path: &Path) -> String {
  std::fs::read_to_string(path).unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}
