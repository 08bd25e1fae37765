//! Implementation of the `coursepress build` command.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use coursepress_lib::orchestrator::{BuildOptions, Orchestrator};
use coursepress_lib::record::{BuildRecord, BuildState};
use coursepress_lib::settings::{PublishMode, Settings};

use super::{course_key, runtime};
use crate::output::{OutputFormat, format_duration, print_error, print_info, print_json, print_stat, print_success, print_warning};

pub struct BuildArgs {
  pub source: Option<PathBuf>,
  pub skip_build: bool,
  pub image: Option<String>,
  pub command: Option<String>,
  pub no_publish: bool,
}

/// Build a course and, unless deferred, publish it.
///
/// Fails when the build or the publish does not complete; the record, log
/// included, is kept either way.
pub fn cmd_build(settings: Settings, course: &str, args: BuildArgs, output: OutputFormat) -> Result<()> {
  let key = course_key(course)?;
  let source = match args.source {
    Some(dir) => Some(dunce::canonicalize(&dir).with_context(|| format!("Source directory {} not found", dir.display()))?),
    None => None,
  };
  let options = BuildOptions {
    source,
    skip_build: args.skip_build,
    image: args.image,
    command: args.command,
    publish_mode: args.no_publish.then_some(PublishMode::Deferred),
  };

  let orchestrator = Orchestrator::new(settings);
  let rt = runtime()?;
  let record = rt.block_on(async {
    let ticket = orchestrator.submit_build(&key, options)?;
    if !output.is_json() {
      print_info(&format!("Building {} version {}", key, ticket.version_id));
    }
    ticket.wait().await
  })?;

  if output.is_json() {
    print_json(&record)?;
  } else {
    print_record(&record);
  }

  match record.state {
    BuildState::Built | BuildState::Published => Ok(()),
    state => bail!(
      "{} version {} ended {}: {}",
      record.course_key,
      record.version_id,
      state,
      record.error.as_deref().unwrap_or("no error recorded")
    ),
  }
}

pub(super) fn print_record(record: &BuildRecord) {
  println!();
  match record.state {
    BuildState::Published => print_success(&format!("Published {} version {}", record.course_key, record.version_id)),
    BuildState::Built => print_success(&format!(
      "Stored {} version {}, publish pending",
      record.course_key, record.version_id
    )),
    state => print_error(&format!("{} version {} is {}", record.course_key, record.version_id, state)),
  }
  if let Some(revision) = &record.revision {
    print_stat("Revision", revision);
  }
  if let Some(finished) = record.finished_at
    && let Ok(elapsed) = (finished - record.started_at).to_std()
  {
    print_stat("Duration", &format_duration(elapsed));
  }
  if let Some(report) = &record.publish_report {
    for endpoint in &report.endpoints {
      if endpoint.status.is_ok() {
        print_stat(&endpoint.url, &endpoint.status.to_string());
      } else {
        print_warning(&format!("{}: {}", endpoint.url, endpoint.status));
      }
    }
  }
}
