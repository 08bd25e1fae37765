use serde::Serialize;
use tracing::warn;

use super::{BuildError, Orchestrator};
use crate::lock::{self, CourseLock, LockScope};
use crate::record::{BuildRecord, BuildState};
use crate::store::StoreMeta;
use crate::types::{CourseKey, VersionId};

/// What is happening to a course right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CourseState {
  Idle,
  Running { version_id: VersionId },
  Publishing { version_id: VersionId },
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseStatus {
  pub course_key: CourseKey,
  #[serde(flatten)]
  pub state: CourseState,
  pub latest: Option<BuildRecord>,
  pub stored: Option<StoreMeta>,
  pub published: Option<StoreMeta>,
}

impl Orchestrator {
  /// Current state of a course, from what is on disk.
  ///
  /// A RUNNING record whose build lock nobody holds, or a PUBLISHING record
  /// whose process is gone, belongs to a worker that died; it is rewritten
  /// as interrupted before being reported.
  pub fn status(&self, course_key: &CourseKey) -> Result<CourseStatus, BuildError> {
    let latest = match self.records.latest(course_key)? {
      Some(record) => Some(self.settle(record)?),
      None => None,
    };
    let state = match &latest {
      Some(r) if r.state == BuildState::Running => CourseState::Running {
        version_id: r.version_id,
      },
      Some(r) if r.state == BuildState::Publishing => CourseState::Publishing {
        version_id: r.version_id,
      },
      _ => CourseState::Idle,
    };

    Ok(CourseStatus {
      course_key: course_key.clone(),
      state,
      latest,
      stored: self.store.stored_version(course_key)?,
      published: self.store.published_version(course_key)?,
    })
  }

  /// One build record, settled like in [`Orchestrator::status`].
  pub fn record(&self, course_key: &CourseKey, version_id: VersionId) -> Result<BuildRecord, BuildError> {
    let record = self.records.load(course_key, version_id)?;
    self.settle(record)
  }

  /// All kept build records of a course, newest first.
  pub fn history(&self, course_key: &CourseKey) -> Result<Vec<BuildRecord>, BuildError> {
    let mut records = Vec::new();
    for version_id in self.records.list(course_key)?.into_iter().rev() {
      records.push(self.record(course_key, version_id)?);
    }
    Ok(records)
  }

  fn settle(&self, mut record: BuildRecord) -> Result<BuildRecord, BuildError> {
    let abandoned = match record.state {
      BuildState::Running => !CourseLock::is_held(&self.store.locks_dir(), &record.course_key, LockScope::Build)?,
      BuildState::Publishing => !lock::process_alive(record.pid),
      _ => false,
    };
    if abandoned {
      warn!(
        course_key = %record.course_key,
        version_id = %record.version_id,
        state = %record.state,
        pid = record.pid,
        "worker is gone, marking record interrupted"
      );
      let state = record.state.interrupted();
      record.fail(state, "interrupted");
      self.records.save(&record)?;
    }
    Ok(record)
  }
}
