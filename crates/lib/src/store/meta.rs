use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consts::META_FILENAME;
use crate::types::{CourseKey, VersionId};
use crate::util::hash::ContentHash;

/// Per-exercise default configuration values returned by graders.
pub type ExerciseDefaults = BTreeMap<String, serde_json::Value>;

/// Metadata stored inside a course tree as `.coursepress.json`.
///
/// Written last when a tree enters the store; a tree without it is not valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
  pub course_key: CourseKey,
  pub version_id: VersionId,
  pub stored_at: DateTime<Utc>,
  #[serde(default)]
  pub revision: Option<String>,
  /// Hash of the tree contents, excluding this file.
  pub tree_hash: ContentHash,
  #[serde(default)]
  pub exercise_defaults: ExerciseDefaults,
}

pub(crate) fn read_meta(dir: &Path) -> io::Result<Option<StoreMeta>> {
  match fs::read_to_string(dir.join(META_FILENAME)) {
    Ok(content) => serde_json::from_str(&content).map(Some).map_err(io::Error::other),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
  }
}

pub(crate) fn write_meta(dir: &Path, meta: &StoreMeta) -> io::Result<()> {
  let content = serde_json::to_string_pretty(meta).map_err(io::Error::other)?;
  fs::write(dir.join(META_FILENAME), content)
}
