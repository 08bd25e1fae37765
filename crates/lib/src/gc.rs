//! Reclaiming disk space left behind by builds.
//!
//! Removes staging trees of courses with no running build, retired trees
//! beyond the kept count, temporaries of dead promotions and old build
//! records. Courses whose build lock is held are skipped whole.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{PUBLISH_DIR, RETIRED_DIR, STAGING_DIR, STORE_DIR};
use crate::lock::{CourseLock, LockError, LockScope};
use crate::record::{RecordError, RecordStore};
use crate::settings::Settings;
use crate::store::{StoreError, VersionStore};
use crate::types::CourseKey;

#[derive(Debug, Error)]
pub enum GcError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Record(#[from] RecordError),

  #[error(transparent)]
  Lock(#[from] LockError),
}

#[derive(Debug, Default, serde::Serialize)]
pub struct GcStats {
  pub courses_scanned: usize,
  pub courses_busy: usize,
  pub trees_removed: usize,
  pub temporaries_removed: usize,
  pub records_pruned: usize,
}

impl GcStats {
  pub fn total_removed(&self) -> usize {
    self.trees_removed + self.temporaries_removed + self.records_pruned
  }
}

#[derive(Debug, serde::Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
}

/// Course keys with anything on disk or registered in settings.
fn known_courses(store: &VersionStore, records: &RecordStore, settings: &Settings) -> BTreeSet<CourseKey> {
  let root = store.root();
  let dirs = [
    root.join(STAGING_DIR),
    root.join(STORE_DIR),
    root.join(PUBLISH_DIR),
    root.join(PUBLISH_DIR).join(RETIRED_DIR),
    records.base_path().clone(),
  ];

  let mut keys: BTreeSet<CourseKey> = settings
    .courses
    .iter()
    .filter_map(|c| CourseKey::new(c.key.as_str()).ok())
    .collect();
  for dir in dirs {
    keys.extend(subdir_keys(&dir));
  }
  keys
}

fn subdir_keys(dir: &Path) -> Vec<CourseKey> {
  let Ok(entries) = fs::read_dir(dir) else {
    return Vec::new();
  };
  entries
    .flatten()
    .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
    .filter_map(|e| e.file_name().to_str().and_then(|n| CourseKey::new(n).ok()))
    .collect()
}

pub fn collect_garbage(store: &VersionStore, records: &RecordStore, settings: &Settings) -> Result<GcResult, GcError> {
  let mut stats = GcStats::default();
  let mut deleted_paths = store.sweep_temporaries()?;
  stats.temporaries_removed = deleted_paths.len();

  for course_key in known_courses(store, records, settings) {
    stats.courses_scanned += 1;

    // Holding the build lock keeps a new build from starting mid-sweep.
    let _lock = match CourseLock::try_acquire(&store.locks_dir(), &course_key, LockScope::Build, None) {
      Ok(lock) => lock,
      Err(LockError::BuildInProgress { .. }) => {
        debug!(course_key = %course_key, "build running, skipping");
        stats.courses_busy += 1;
        continue;
      }
      Err(e) => return Err(e.into()),
    };

    match store.reclaim(&course_key, None) {
      Ok(reclaimed) => {
        stats.trees_removed += reclaimed.removed.len();
        deleted_paths.extend(reclaimed.removed);
      }
      Err(e) => warn!(course_key = %course_key, error = %e, "failed to reclaim trees"),
    }

    stats.records_pruned += records.prune(&course_key, settings.keep_records)?.len();
  }

  info!(
    courses = stats.courses_scanned,
    busy = stats.courses_busy,
    trees_removed = stats.trees_removed,
    temporaries_removed = stats.temporaries_removed,
    records_pruned = stats.records_pruned,
    "garbage collection complete"
  );

  Ok(GcResult { stats, deleted_paths })
}
