use anyhow::{Result, bail};

use coursepress_lib::orchestrator::Orchestrator;
use coursepress_lib::record::BuildState;
use coursepress_lib::settings::Settings;

use super::build::print_record;
use super::{course_key, runtime, version};
use crate::output::{OutputFormat, print_json};

pub fn cmd_publish(settings: Settings, course: &str, version_id: Option<u64>, output: OutputFormat) -> Result<()> {
  let key = course_key(course)?;
  let orchestrator = Orchestrator::new(settings);
  let record = runtime()?.block_on(orchestrator.publish(&key, version(version_id)))?;

  if output.is_json() {
    print_json(&record)?;
  } else {
    print_record(&record);
  }

  if record.state != BuildState::Published {
    bail!(
      "publish of {} version {} failed: {}",
      record.course_key,
      record.version_id,
      record.error.as_deref().unwrap_or("no error recorded")
    );
  }
  Ok(())
}
