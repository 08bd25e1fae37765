use anyhow::{Result, bail};

use coursepress_lib::orchestrator::Orchestrator;
use coursepress_lib::settings::Settings;

use super::{course_key, version};
use crate::output::print_error;

pub fn cmd_log(settings: Settings, course: &str, version_id: Option<u64>) -> Result<()> {
  let key = course_key(course)?;
  let orchestrator = Orchestrator::new(settings);

  let record = match version(version_id) {
    Some(v) => orchestrator.record(&key, v)?,
    None => match orchestrator.history(&key)?.into_iter().next() {
      Some(record) => record,
      None => bail!("no builds recorded for {}", key),
    },
  };

  print!("{}", record.log);
  if let Some(error) = &record.error {
    print_error(error);
  }
  Ok(())
}
