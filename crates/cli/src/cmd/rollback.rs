use anyhow::{Context, Result};

use coursepress_lib::orchestrator::Orchestrator;
use coursepress_lib::settings::Settings;

use super::course_key;
use crate::output::{print_success, print_warning};

pub fn cmd_rollback(settings: Settings, course: &str) -> Result<()> {
  let key = course_key(course)?;
  let orchestrator = Orchestrator::new(settings);
  let version_id = orchestrator.rollback(&key).context("Rollback failed")?;

  print_success(&format!("{} is back at version {}", key, version_id));
  print_warning("Graders still serve the configuration of the newer version");
  Ok(())
}
