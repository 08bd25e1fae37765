use std::time::Instant;

use anyhow::Result;

use coursepress_lib::gc::collect_garbage;
use coursepress_lib::orchestrator::Orchestrator;
use coursepress_lib::settings::Settings;

use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success};

pub fn cmd_gc(settings: Settings, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let orchestrator = Orchestrator::new(settings);

  let result = collect_garbage(orchestrator.store(), orchestrator.records(), orchestrator.settings())?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    print_success("Garbage collection complete!");
    print_stat("Courses scanned", &result.stats.courses_scanned.to_string());
    if result.stats.courses_busy > 0 {
      print_stat("Skipped (building)", &result.stats.courses_busy.to_string());
    }
    print_stat("Trees removed", &result.stats.trees_removed.to_string());
    print_stat("Temporaries removed", &result.stats.temporaries_removed.to_string());
    print_stat("Records pruned", &result.stats.records_pruned.to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
