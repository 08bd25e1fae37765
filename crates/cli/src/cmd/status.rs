//! Status command implementation.
//!
//! Shows what each course is doing and which versions are stored and live.

use anyhow::Result;

use coursepress_lib::orchestrator::{CourseState, CourseStatus, Orchestrator};
use coursepress_lib::settings::Settings;
use coursepress_lib::store::StoreMeta;

use super::course_key;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, print_warning, truncate_hash};

pub fn cmd_status(settings: Settings, course: Option<&str>, output: OutputFormat) -> Result<()> {
  let keys = match course {
    Some(raw) => vec![course_key(raw)?],
    None => settings
      .courses
      .iter()
      .map(|c| course_key(&c.key))
      .collect::<Result<Vec<_>>>()?,
  };
  let orchestrator = Orchestrator::new(settings);

  let statuses = keys
    .iter()
    .map(|key| orchestrator.status(key))
    .collect::<Result<Vec<_>, _>>()?;

  if output.is_json() {
    match (course, statuses.as_slice()) {
      (Some(_), [status]) => print_json(status)?,
      _ => print_json(&statuses)?,
    }
    return Ok(());
  }

  if statuses.is_empty() {
    print_info("No courses configured.");
  }
  for status in &statuses {
    print_status(status);
  }
  Ok(())
}

fn print_status(status: &CourseStatus) {
  match status.state {
    CourseState::Idle => print_success(&format!("{}: idle", status.course_key)),
    CourseState::Running { version_id } => print_warning(&format!("{}: building version {}", status.course_key, version_id)),
    CourseState::Publishing { version_id } => {
      print_warning(&format!("{}: publishing version {}", status.course_key, version_id))
    }
  }

  if let Some(latest) = &status.latest {
    print_stat(
      "Latest build",
      &format!("{} {} ({})", latest.version_id, latest.state, latest.updated_at),
    );
    if let Some(error) = &latest.error {
      print_stat("Error", error);
    }
  }
  print_stat("Stored", &describe(status.stored.as_ref()));
  print_stat("Live", &describe(status.published.as_ref()));
  println!();
}

fn describe(meta: Option<&StoreMeta>) -> String {
  match meta {
    Some(meta) => {
      let hash = meta.tree_hash.to_string();
      format!("{} [{}]", meta.version_id, truncate_hash(&hash))
    }
    None => "-".to_string(),
  }
}
