//! Builds run directly on the service host.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::process::run_captured;
use super::{BuildRequest, BuildRunner, RunOutput, RunnerError};

/// Runs the build command with `/bin/sh -c` inside the source tree.
///
/// Without a command, `build.sh` is run if present, else `make html` if there
/// is a Makefile, else the tree is taken as already built.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

#[async_trait]
impl BuildRunner for LocalRunner {
  fn name(&self) -> &'static str {
    "local"
  }

  async fn run(&self, request: &BuildRequest) -> Result<RunOutput, RunnerError> {
    let script = match &request.command {
      Some(command) => command.clone(),
      None if request.source_path.join("build.sh").is_file() => "/bin/sh ./build.sh".to_string(),
      None if request.source_path.join("Makefile").is_file() => "make html".to_string(),
      None => return Ok(RunOutput::skipped("no build command and no build.sh or Makefile, nothing to build")),
    };

    info!(
      course_key = %request.course_key,
      version_id = %request.version_id,
      command = %script,
      "running local build"
    );

    let mut command = Command::new("/bin/sh");
    command
      .arg("-c")
      .arg(&script)
      .current_dir(&request.source_path)
      .envs(&request.env);

    run_captured(command, "/bin/sh", request.timeout).await
  }
}
