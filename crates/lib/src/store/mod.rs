//! Version store: staging, validated store and live publish trees.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── staging/<key>/<version_id>/     # fetch + build working tree
//! ├── store/<key>/                    # validated, not yet live
//! ├── publish/<key>/                  # live tree
//! └── publish/.retired/<key>/<ver>/   # previous live trees for rollback
//! ```
//!
//! Stored and published trees carry their [`StoreMeta`] inside them, so a tree
//! and its metadata always move together in a single rename.

mod meta;
mod swap;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use meta::{ExerciseDefaults, StoreMeta};
use swap::replace_dir;

use crate::consts::{META_FILENAME, PUBLISH_DIR, RETIRED_DIR, STAGING_DIR, STATE_DIR, STORE_DIR, TEMP_PREFIX, VCS_DIRS};
use crate::lock::{CourseLock, LockError, LockScope, process_alive};
use crate::types::{CourseKey, VersionId};
use crate::util::fs::{TreeError, copy_tree, remove_tree};
use crate::util::hash::{ContentHash, TreeHashError, hash_tree};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("{course_key}: requested version {requested} but store holds {found}")]
  VersionMismatch {
    course_key: CourseKey,
    requested: VersionId,
    found: VersionId,
  },

  #[error("{course_key}: no stored version to publish")]
  NothingStored { course_key: CourseKey },

  #[error("{course_key}: no retired version older than the live one")]
  NothingToRollBack { course_key: CourseKey },

  #[error("{course_key}: stored tree for version {version_id} was modified after promotion")]
  Corrupt {
    course_key: CourseKey,
    version_id: VersionId,
  },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Tree(#[from] TreeError),

  #[error(transparent)]
  Hash(#[from] TreeHashError),

  #[error("{action} {path}: {source}")]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> StoreError {
  let path = path.to_path_buf();
  move |source| StoreError::Io { action, path, source }
}

/// Details a caller supplies when promoting a tree into the store.
#[derive(Debug, Clone, Default)]
pub struct StoreInput {
  pub revision: Option<String>,
  pub exercise_defaults: ExerciseDefaults,
}

/// What `promote_to_publish` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
  /// The stored tree is now live; `previous` was retired.
  Promoted { previous: Option<VersionId> },
  /// The requested version was already live; nothing moved.
  AlreadyLive,
}

/// Summary of a reclaim pass.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ReclaimStats {
  pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct VersionStore {
  root: PathBuf,
  filelock_timeout: Duration,
  keep_retired: usize,
}

impl VersionStore {
  pub fn new(root: impl Into<PathBuf>, filelock_timeout: Duration, keep_retired: usize) -> Self {
    Self {
      root: root.into(),
      filelock_timeout,
      keep_retired,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn locks_dir(&self) -> PathBuf {
    self.root.join(STATE_DIR).join("locks")
  }

  pub fn staging_path(&self, course_key: &CourseKey, version_id: VersionId) -> PathBuf {
    self
      .root
      .join(STAGING_DIR)
      .join(course_key.as_str())
      .join(version_id.to_string())
  }

  pub fn store_path(&self, course_key: &CourseKey) -> PathBuf {
    self.root.join(STORE_DIR).join(course_key.as_str())
  }

  pub fn publish_path(&self, course_key: &CourseKey) -> PathBuf {
    self.root.join(PUBLISH_DIR).join(course_key.as_str())
  }

  pub fn retired_dir(&self, course_key: &CourseKey) -> PathBuf {
    self.root.join(PUBLISH_DIR).join(RETIRED_DIR).join(course_key.as_str())
  }

  fn temp_name(course_key: &CourseKey, version_id: VersionId, tag: &str) -> String {
    format!("{}{}-{}-{}-{}", TEMP_PREFIX, course_key, version_id, tag, std::process::id())
  }

  /// Create an empty staging directory for a build.
  pub fn prepare_staging(&self, course_key: &CourseKey, version_id: VersionId) -> Result<PathBuf, StoreError> {
    let path = self.staging_path(course_key, version_id);
    remove_tree(&path).map_err(io_err("clear", &path))?;
    fs::create_dir_all(&path).map_err(io_err("create", &path))?;
    Ok(path)
  }

  pub fn remove_staging(&self, course_key: &CourseKey, version_id: VersionId) -> Result<(), StoreError> {
    let path = self.staging_path(course_key, version_id);
    remove_tree(&path).map_err(io_err("remove", &path))
  }

  /// The version waiting in the store, if it is newer than the live one.
  ///
  /// An interrupted publish can leave the previous live tree at the store
  /// path; such an entry is not a candidate for publishing.
  pub fn stored_version(&self, course_key: &CourseKey) -> Result<Option<StoreMeta>, StoreError> {
    let Some(stored) = self.read_store_meta(course_key)? else {
      return Ok(None);
    };
    match self.published_version(course_key)? {
      Some(live) if stored.version_id <= live.version_id => Ok(None),
      _ => Ok(Some(stored)),
    }
  }

  fn read_store_meta(&self, course_key: &CourseKey) -> Result<Option<StoreMeta>, StoreError> {
    let path = self.store_path(course_key);
    meta::read_meta(&path).map_err(io_err("read metadata in", &path))
  }

  pub fn published_version(&self, course_key: &CourseKey) -> Result<Option<StoreMeta>, StoreError> {
    let path = self.publish_path(course_key);
    meta::read_meta(&path).map_err(io_err("read metadata in", &path))
  }

  /// Retired versions of a course, oldest first.
  pub fn retired_versions(&self, course_key: &CourseKey) -> Result<Vec<VersionId>, StoreError> {
    let dir = self.retired_dir(course_key);
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(io_err("list", &dir)(e)),
    };
    let mut versions: Vec<VersionId> = entries
      .flatten()
      .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
      .collect();
    versions.sort();
    Ok(versions)
  }

  fn promote_lock(&self, course_key: &CourseKey) -> Result<CourseLock, StoreError> {
    Ok(CourseLock::acquire_with_timeout(
      &self.locks_dir(),
      course_key,
      LockScope::Promote,
      self.filelock_timeout,
    )?)
  }

  /// Copy a validated tree into the store, replacing any older stored version.
  ///
  /// The copy is assembled under a temporary name and metadata is written
  /// last, so the store entry is either absent, the old tree, or complete.
  pub fn promote_to_store(
    &self,
    course_key: &CourseKey,
    version_id: VersionId,
    source: &Path,
    input: StoreInput,
  ) -> Result<StoreMeta, StoreError> {
    let _guard = self.promote_lock(course_key)?;
    let store_root = self.root.join(STORE_DIR);
    fs::create_dir_all(&store_root).map_err(io_err("create", &store_root))?;

    let temp = store_root.join(Self::temp_name(course_key, version_id, "in"));
    remove_tree(&temp).map_err(io_err("clear", &temp))?;

    let mut exclude: Vec<&str> = VCS_DIRS.to_vec();
    exclude.push(META_FILENAME);
    let files = copy_tree(source, &temp, &exclude)?;
    let tree_hash = hash_tree(&temp, &[META_FILENAME])?;

    let meta = StoreMeta {
      course_key: course_key.clone(),
      version_id,
      stored_at: Utc::now(),
      revision: input.revision,
      tree_hash,
      exercise_defaults: input.exercise_defaults,
    };
    meta::write_meta(&temp, &meta).map_err(io_err("write metadata in", &temp))?;

    let live = self.store_path(course_key);
    let outgoing = store_root.join(Self::temp_name(course_key, version_id, "out"));
    let replaced = replace_dir(&temp, &live, &outgoing).map_err(io_err("promote into", &live))?;
    if replaced && let Err(e) = remove_tree(&outgoing) {
      warn!(path = %outgoing.display(), error = %e, "failed to remove replaced store tree");
    }

    info!(course_key = %course_key, version_id = %version_id, files, "promoted to store");
    Ok(meta)
  }

  /// Make the stored version live.
  ///
  /// Requesting the live version is a no-op, whatever the store holds.
  /// Otherwise fails with [`StoreError::VersionMismatch`] unless the store
  /// holds exactly `version_id`. The previous live tree is retired for rollback.
  pub fn promote_to_publish(
    &self,
    course_key: &CourseKey,
    version_id: VersionId,
  ) -> Result<PublishOutcome, StoreError> {
    let _guard = self.promote_lock(course_key)?;

    if let Some(live) = self.published_version(course_key)?
      && live.version_id == version_id
    {
      debug!(course_key = %course_key, version_id = %version_id, "already live");
      return Ok(PublishOutcome::AlreadyLive);
    }

    let Some(stored) = self.stored_version(course_key)? else {
      return Err(StoreError::NothingStored {
        course_key: course_key.clone(),
      });
    };

    if stored.version_id != version_id {
      return Err(StoreError::VersionMismatch {
        course_key: course_key.clone(),
        requested: version_id,
        found: stored.version_id,
      });
    }

    let store_path = self.store_path(course_key);
    if hash_tree(&store_path, &[META_FILENAME])? != stored.tree_hash {
      return Err(StoreError::Corrupt {
        course_key: course_key.clone(),
        version_id,
      });
    }

    let publish_path = self.publish_path(course_key);
    let publish_root = self.root.join(PUBLISH_DIR);
    fs::create_dir_all(&publish_root).map_err(io_err("create", &publish_root))?;

    let previous = self.published_version(course_key)?.map(|m| m.version_id);
    let retired_dir = self.retired_dir(course_key);
    fs::create_dir_all(&retired_dir).map_err(io_err("create", &retired_dir))?;
    let outgoing = match previous {
      Some(v) => retired_dir.join(v.to_string()),
      None => retired_dir.join(Self::temp_name(course_key, version_id, "unversioned")),
    };
    remove_tree(&outgoing).map_err(io_err("clear", &outgoing))?;

    replace_dir(&store_path, &publish_path, &outgoing).map_err(io_err("publish into", &publish_path))?;
    info!(
      course_key = %course_key,
      version_id = %version_id,
      previous = ?previous.map(|v| v.0),
      "published"
    );

    if previous.is_none() {
      remove_tree(&outgoing).map_err(io_err("remove", &outgoing))?;
    }
    self.prune_retired(course_key)?;

    Ok(PublishOutcome::Promoted { previous })
  }

  /// Put the newest retired version older than the live one back into publish.
  ///
  /// The tree it replaces is retired in turn. Returns the version now live.
  pub fn rollback(&self, course_key: &CourseKey) -> Result<VersionId, StoreError> {
    let _guard = self.promote_lock(course_key)?;

    let live = self.published_version(course_key)?;
    let live_version = live.as_ref().map(|m| m.version_id);
    let target = self
      .retired_versions(course_key)?
      .into_iter()
      .rev()
      .find(|v| live_version.is_none_or(|live| *v < live))
      .ok_or_else(|| StoreError::NothingToRollBack {
        course_key: course_key.clone(),
      })?;

    let retired_dir = self.retired_dir(course_key);
    let incoming = retired_dir.join(target.to_string());
    let outgoing = match live_version {
      Some(v) => retired_dir.join(v.to_string()),
      None => retired_dir.join(Self::temp_name(course_key, target, "unversioned")),
    };
    remove_tree(&outgoing).map_err(io_err("clear", &outgoing))?;

    let publish_path = self.publish_path(course_key);
    replace_dir(&incoming, &publish_path, &outgoing).map_err(io_err("roll back into", &publish_path))?;
    info!(course_key = %course_key, version_id = %target, from = ?live_version.map(|v| v.0), "rolled back");
    Ok(target)
  }

  /// Drop retired trees beyond the newest `keep_retired`.
  pub fn prune_retired(&self, course_key: &CourseKey) -> Result<Vec<PathBuf>, StoreError> {
    let versions = self.retired_versions(course_key)?;
    let excess = versions.len().saturating_sub(self.keep_retired);
    let mut removed = Vec::new();
    for v in versions.into_iter().take(excess) {
      let path = self.retired_dir(course_key).join(v.to_string());
      remove_tree(&path).map_err(io_err("remove", &path))?;
      debug!(course_key = %course_key, version_id = %v, "reclaimed retired tree");
      removed.push(path);
    }
    Ok(removed)
  }

  /// Reclaim a course's superseded trees: excess retired versions and stale
  /// staging directories other than `keep`.
  pub fn reclaim(&self, course_key: &CourseKey, keep: Option<VersionId>) -> Result<ReclaimStats, StoreError> {
    let mut stats = ReclaimStats {
      removed: self.prune_retired(course_key)?,
    };
    if let Some(path) = self.recover_stale_store(course_key)? {
      stats.removed.push(path);
    }

    let staging = self.root.join(STAGING_DIR).join(course_key.as_str());
    if let Ok(entries) = fs::read_dir(&staging) {
      for entry in entries.flatten() {
        let version: Option<VersionId> = entry.file_name().to_str().and_then(|n| n.parse().ok());
        if version.is_some() && version == keep {
          continue;
        }
        let path = entry.path();
        remove_tree(&path).map_err(io_err("remove", &path))?;
        stats.removed.push(path);
      }
    }
    Ok(stats)
  }

  /// Finish a publish interrupted between its two renames.
  ///
  /// The previous live tree left at the store path goes where the publish
  /// would have put it, into the retired slots, or is removed when that slot
  /// is taken. Returns the path removed, if any.
  fn recover_stale_store(&self, course_key: &CourseKey) -> Result<Option<PathBuf>, StoreError> {
    let _guard = self.promote_lock(course_key)?;
    let (Some(stored), Some(live)) = (self.read_store_meta(course_key)?, self.published_version(course_key)?) else {
      return Ok(None);
    };
    if stored.version_id > live.version_id {
      return Ok(None);
    }

    let store_path = self.store_path(course_key);
    let retired_dir = self.retired_dir(course_key);
    let slot = retired_dir.join(stored.version_id.to_string());
    if stored.version_id < live.version_id && fs::symlink_metadata(&slot).is_err() {
      fs::create_dir_all(&retired_dir).map_err(io_err("create", &retired_dir))?;
      fs::rename(&store_path, &slot).map_err(io_err("retire", &store_path))?;
      info!(course_key = %course_key, version_id = %stored.version_id, "retired tree left in store");
      self.prune_retired(course_key)?;
      return Ok(None);
    }

    remove_tree(&store_path).map_err(io_err("remove", &store_path))?;
    warn!(course_key = %course_key, version_id = %stored.version_id, "removed stale store tree");
    Ok(Some(store_path))
  }

  /// Remove `.tmp-*` entries left by interrupted promotions.
  ///
  /// Entries whose creating process is still alive are left alone.
  pub fn sweep_temporaries(&self) -> Result<Vec<PathBuf>, StoreError> {
    let mut removed = Vec::new();
    let mut dirs = vec![self.root.join(STORE_DIR), self.root.join(PUBLISH_DIR)];
    if let Ok(entries) = fs::read_dir(self.root.join(PUBLISH_DIR).join(RETIRED_DIR)) {
      dirs.extend(entries.flatten().map(|e| e.path()));
    }

    for dir in dirs {
      let Ok(entries) = fs::read_dir(&dir) else {
        continue;
      };
      for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(TEMP_PREFIX) {
          continue;
        }
        let owner = name.rsplit('-').next().and_then(|pid| pid.parse::<u32>().ok());
        if owner.is_some_and(process_alive) {
          continue;
        }
        let path = entry.path();
        remove_tree(&path).map_err(io_err("remove", &path))?;
        debug!(path = %path.display(), "swept temporary entry");
        removed.push(path);
      }
    }
    Ok(removed)
  }

  /// Hash of the live tree, excluding metadata.
  pub fn published_hash(&self, course_key: &CourseKey) -> Result<ContentHash, StoreError> {
    Ok(hash_tree(&self.publish_path(course_key), &[META_FILENAME])?)
  }
}
