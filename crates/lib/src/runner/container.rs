//! Builds run in a throwaway container.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use super::process::run_captured;
use super::{BuildRequest, BuildRunner, RunOutput, RunnerError, split_command};
use crate::settings::PathMapping;

/// Mount point of the source tree inside the container.
const CONTENT_DIR: &str = "/content";

/// Runs the build image with the source tree bind-mounted at `/content`.
///
/// When the service itself runs in a container, `path_mappings` translate the
/// staging path to the path the container engine sees on the host.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
  pub program: String,
  pub path_mappings: Vec<PathMapping>,
  pub extra_args: Vec<String>,
}

impl ContainerRunner {
  /// Name of the container for one build; unique per version.
  pub fn container_name(request: &BuildRequest) -> String {
    format!("coursepress-{}-{}", request.course_key, request.version_id)
  }

  fn host_path(&self, path: &Path) -> Result<PathBuf, RunnerError> {
    if self.path_mappings.is_empty() {
      return Ok(path.to_path_buf());
    }
    self
      .path_mappings
      .iter()
      .find_map(|m| path.strip_prefix(&m.service).ok().map(|rest| m.host.join(rest)))
      .ok_or_else(|| RunnerError::UnmappedPath(path.to_path_buf()))
  }

  /// Arguments for `<program>`, starting with `run`.
  pub fn run_args(&self, request: &BuildRequest, image: &str) -> Result<Vec<String>, RunnerError> {
    let host_path = self.host_path(&request.source_path)?;

    let mut args = vec![
      "run".to_string(),
      "--rm".to_string(),
      "--name".to_string(),
      Self::container_name(request),
    ];
    for (key, value) in &request.env {
      args.push("-e".to_string());
      args.push(format!("{key}={value}"));
    }
    args.extend([
      "-v".to_string(),
      format!("{}:{CONTENT_DIR}", host_path.display()),
      "--workdir".to_string(),
      CONTENT_DIR.to_string(),
    ]);
    args.extend(self.extra_args.iter().cloned());
    args.push(image.to_string());
    if let Some(command) = &request.command {
      args.extend(split_command(command)?);
    }
    Ok(args)
  }

  async fn remove_container(&self, name: &str) {
    let result = Command::new(&self.program)
      .args(["rm", "-f", name])
      .stdout(std::process::Stdio::null())
      .stderr(std::process::Stdio::null())
      .status()
      .await;
    if let Err(e) = result {
      warn!(container = name, error = %e, "failed to remove build container");
    }
  }
}

#[async_trait]
impl BuildRunner for ContainerRunner {
  fn name(&self) -> &'static str {
    "container"
  }

  async fn run(&self, request: &BuildRequest) -> Result<RunOutput, RunnerError> {
    let Some(image) = request.image.as_deref().filter(|i| !i.is_empty()) else {
      return Ok(RunOutput::skipped("no build image configured, nothing to build"));
    };

    let args = self.run_args(request, image)?;
    let name = Self::container_name(request);
    info!(
      course_key = %request.course_key,
      version_id = %request.version_id,
      container = %name,
      image,
      "running container build"
    );

    let mut command = Command::new(&self.program);
    command.args(&args);
    let result = run_captured(command, &self.program, request.timeout).await;

    match &result {
      Ok(output) if output.success() => {}
      _ => self.remove_container(&name).await,
    }
    result
  }
}
