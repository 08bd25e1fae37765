mod build;
mod gc;
mod log;
mod publish;
mod rollback;
mod status;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use coursepress_lib::settings::Settings;
use coursepress_lib::types::{CourseKey, VersionId};

pub use build::{BuildArgs, cmd_build};
pub use gc::cmd_gc;
pub use log::cmd_log;
pub use publish::cmd_publish;
pub use rollback::cmd_rollback;
pub use status::cmd_status;

pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
  let settings = match path {
    Some(path) => Settings::load(path).with_context(|| format!("Failed to load settings from {}", path.display()))?,
    None => Settings::load_default().context("Failed to load settings")?,
  };
  debug!(root = %settings.root.display(), courses = settings.courses.len(), "settings loaded");
  Ok(settings)
}

fn course_key(raw: &str) -> Result<CourseKey> {
  CourseKey::new(raw).context("Invalid course key")
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

fn version(raw: Option<u64>) -> Option<VersionId> {
  raw.map(VersionId)
}
