//! Persistent build records.
//!
//! Every build attempt gets one JSON record, so state and logs are visible to
//! every process sharing the data root and survive restarts.
//!
//! # Storage Layout
//!
//! ```text
//! state/builds/<course_key>/
//! ├── index.json          # RecordIndex: last allocated version id
//! └── <version_id>.json   # BuildRecord
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::grader::PublishReport;
use crate::types::{CourseKey, VersionId};

const INDEX_FILENAME: &str = "index.json";
const RECORD_INDEX_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RecordError {
  #[error("failed to create record directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read build record: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write build record: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse build record: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize build record: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("no build record {version_id} for {course_key}")]
  NotFound { course_key: CourseKey, version_id: VersionId },

  #[error("unsupported record index version: {0}")]
  UnsupportedVersion(u32),
}

/// Persisted state of one build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildState {
  Running,
  Failed,
  Built,
  Publishing,
  Published,
  PublishFailed,
}

impl BuildState {
  /// States that only make sense while some process is working on the record.
  pub fn is_active(self) -> bool {
    matches!(self, BuildState::Running | BuildState::Publishing)
  }

  /// The state a record is left in when its worker disappeared.
  pub fn interrupted(self) -> Self {
    match self {
      BuildState::Running => BuildState::Failed,
      BuildState::Publishing => BuildState::PublishFailed,
      other => other,
    }
  }
}

impl std::fmt::Display for BuildState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      BuildState::Running => "RUNNING",
      BuildState::Failed => "FAILED",
      BuildState::Built => "BUILT",
      BuildState::Publishing => "PUBLISHING",
      BuildState::Published => "PUBLISHED",
      BuildState::PublishFailed => "PUBLISH_FAILED",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
  pub course_key: CourseKey,
  pub version_id: VersionId,
  pub state: BuildState,
  pub started_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub finished_at: Option<DateTime<Utc>>,
  /// Process that last moved this record into an active state.
  pub pid: u32,
  /// Source revision reported by the fetcher, e.g. a commit hash.
  #[serde(default)]
  pub revision: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub log: String,
  #[serde(default)]
  pub publish_report: Option<PublishReport>,
}

impl BuildRecord {
  pub fn running(course_key: CourseKey, version_id: VersionId) -> Self {
    let now = Utc::now();
    Self {
      course_key,
      version_id,
      state: BuildState::Running,
      started_at: now,
      updated_at: now,
      finished_at: None,
      pid: std::process::id(),
      revision: None,
      error: None,
      log: String::new(),
      publish_report: None,
    }
  }

  pub fn transition(&mut self, state: BuildState) {
    let now = Utc::now();
    self.state = state;
    self.updated_at = now;
    if state.is_active() {
      self.pid = std::process::id();
      self.finished_at = None;
    } else {
      self.finished_at = Some(now);
    }
  }

  pub fn fail(&mut self, state: BuildState, error: impl Into<String>) {
    self.error = Some(error.into());
    self.transition(state);
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordIndex {
  pub version: u32,
  pub last_version_id: Option<VersionId>,
}

/// Manages build records on disk.
///
/// Writes go through a temporary file and a rename, so readers in other
/// processes never see a half-written record.
#[derive(Debug, Clone)]
pub struct RecordStore {
  base_path: PathBuf,
}

impl RecordStore {
  pub fn new(base_path: PathBuf) -> Self {
    Self { base_path }
  }

  pub fn base_path(&self) -> &PathBuf {
    &self.base_path
  }

  fn course_dir(&self, course_key: &CourseKey) -> PathBuf {
    self.base_path.join(course_key.as_str())
  }

  fn record_path(&self, course_key: &CourseKey, version_id: VersionId) -> PathBuf {
    self.course_dir(course_key).join(format!("{}.json", version_id))
  }

  fn ensure_dir(&self, course_key: &CourseKey) -> Result<(), RecordError> {
    fs::create_dir_all(self.course_dir(course_key)).map_err(RecordError::CreateDir)
  }

  fn write_atomic(&self, path: &PathBuf, content: &str) -> Result<(), RecordError> {
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content).map_err(RecordError::Write)?;
    fs::rename(&temp_path, path).map_err(RecordError::Write)
  }

  pub fn load_index(&self, course_key: &CourseKey) -> Result<RecordIndex, RecordError> {
    let path = self.course_dir(course_key).join(INDEX_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Ok(RecordIndex {
          version: RECORD_INDEX_VERSION,
          last_version_id: None,
        });
      }
      Err(e) => return Err(RecordError::Read(e)),
    };

    let index: RecordIndex = serde_json::from_str(&content).map_err(RecordError::Parse)?;
    if index.version != RECORD_INDEX_VERSION {
      return Err(RecordError::UnsupportedVersion(index.version));
    }
    Ok(index)
  }

  fn save_index(&self, course_key: &CourseKey, index: &RecordIndex) -> Result<(), RecordError> {
    self.ensure_dir(course_key)?;
    let content = serde_json::to_string_pretty(index).map_err(RecordError::Serialize)?;
    self.write_atomic(&self.course_dir(course_key).join(INDEX_FILENAME), &content)
  }

  /// Allocate the next version id for a course.
  ///
  /// Must be called while holding the course's build lock.
  pub fn allocate_version(&self, course_key: &CourseKey) -> Result<VersionId, RecordError> {
    let mut index = self.load_index(course_key)?;
    let highest_record = self.list(course_key)?.into_iter().max();
    let last = index.last_version_id.max(highest_record);
    let next = last.map(VersionId::next).unwrap_or(VersionId(1));

    index.last_version_id = Some(next);
    self.save_index(course_key, &index)?;
    debug!(course_key = %course_key, version_id = %next, "allocated version");
    Ok(next)
  }

  pub fn save(&self, record: &BuildRecord) -> Result<(), RecordError> {
    self.ensure_dir(&record.course_key)?;
    let content = serde_json::to_string_pretty(record).map_err(RecordError::Serialize)?;
    self.write_atomic(&self.record_path(&record.course_key, record.version_id), &content)
  }

  pub fn load(&self, course_key: &CourseKey, version_id: VersionId) -> Result<BuildRecord, RecordError> {
    let content = fs::read_to_string(self.record_path(course_key, version_id)).map_err(|e| {
      if e.kind() == io::ErrorKind::NotFound {
        RecordError::NotFound {
          course_key: course_key.clone(),
          version_id,
        }
      } else {
        RecordError::Read(e)
      }
    })?;
    serde_json::from_str(&content).map_err(RecordError::Parse)
  }

  /// Version ids with a record, oldest first.
  pub fn list(&self, course_key: &CourseKey) -> Result<Vec<VersionId>, RecordError> {
    let entries = match fs::read_dir(self.course_dir(course_key)) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(RecordError::Read(e)),
    };

    let mut versions: Vec<VersionId> = entries
      .flatten()
      .filter_map(|entry| {
        let name = entry.file_name();
        let stem = name.to_str()?.strip_suffix(".json")?;
        stem.parse().ok()
      })
      .collect();
    versions.sort();
    Ok(versions)
  }

  pub fn latest(&self, course_key: &CourseKey) -> Result<Option<BuildRecord>, RecordError> {
    match self.list(course_key)?.last() {
      Some(version_id) => self.load(course_key, *version_id).map(Some),
      None => Ok(None),
    }
  }

  /// Delete all but the newest `keep` records. Returns the removed versions.
  pub fn prune(&self, course_key: &CourseKey, keep: usize) -> Result<Vec<VersionId>, RecordError> {
    let versions = self.list(course_key)?;
    let excess = versions.len().saturating_sub(keep);
    let mut removed = Vec::new();

    for version_id in versions.into_iter().take(excess) {
      match fs::remove_file(self.record_path(course_key, version_id)) {
        Ok(()) => removed.push(version_id),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(RecordError::Write(e)),
      }
    }

    if !removed.is_empty() {
      debug!(course_key = %course_key, count = removed.len(), "pruned build records");
    }
    Ok(removed)
  }
}
