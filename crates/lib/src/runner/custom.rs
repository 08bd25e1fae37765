use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::process::run_captured;
use super::{BuildRequest, BuildRunner, RunOutput, RunnerError};

/// Delegates the build to an external program.
///
/// The request is passed in `BUILD_*` variables next to the regular build
/// environment; the program runs in the source tree.
#[derive(Debug, Clone)]
pub struct CustomRunner {
  pub program: PathBuf,
  pub args: Vec<String>,
}

impl CustomRunner {
  pub fn request_env(request: &BuildRequest) -> Vec<(&'static str, String)> {
    vec![
      ("BUILD_COURSE_KEY", request.course_key.to_string()),
      ("BUILD_VERSION_ID", request.version_id.to_string()),
      ("BUILD_SOURCE_PATH", request.source_path.display().to_string()),
      ("BUILD_IMAGE", request.image.clone().unwrap_or_default()),
      ("BUILD_COMMAND", request.command.clone().unwrap_or_default()),
      ("BUILD_TIMEOUT_SECS", request.timeout.as_secs().to_string()),
    ]
  }
}

#[async_trait]
impl BuildRunner for CustomRunner {
  fn name(&self) -> &'static str {
    "custom"
  }

  async fn run(&self, request: &BuildRequest) -> Result<RunOutput, RunnerError> {
    let program = self.program.display().to_string();
    info!(
      course_key = %request.course_key,
      version_id = %request.version_id,
      program = %program,
      "running custom build"
    );

    let mut command = Command::new(&self.program);
    command
      .args(&self.args)
      .current_dir(&request.source_path)
      .envs(&request.env)
      .envs(Self::request_env(request));

    run_captured(command, &program, request.timeout).await
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::types::{CourseKey, VersionId};
  use std::collections::BTreeMap;
  use std::time::Duration;
  use tempfile::TempDir;

  #[tokio::test]
  async fn passes_request_in_environment() {
    let temp = TempDir::new().unwrap();
    let runner = CustomRunner {
      program: PathBuf::from("/bin/sh"),
      args: vec![
        "-c".to_string(),
        "echo $BUILD_COURSE_KEY $BUILD_VERSION_ID $BUILD_COMMAND $COURSE_ID".to_string(),
      ],
    };
    let request = BuildRequest {
      course_key: CourseKey::new("c1").unwrap(),
      version_id: VersionId(12),
      source_path: temp.path().to_path_buf(),
      image: None,
      command: Some("make".to_string()),
      env: BTreeMap::from([("COURSE_ID".to_string(), "7".to_string())]),
      timeout: Duration::from_secs(10),
    };
    let output = runner.run(&request).await.unwrap();
    assert!(output.success());
    assert_eq!(output.log, "c1 0000000012 make 7\n");
  }
}
