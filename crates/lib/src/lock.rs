//! File-based per-course locking.
//!
//! Each course has two lock files under `state/locks/`:
//! - `<key>.build.lock` is held for the whole fetch/build/validate/store pipeline.
//!   A second build attempt fails immediately with [`LockError::BuildInProgress`].
//! - `<key>.promote.lock` guards the store and publish directory transitions.
//!   Callers wait for it up to a timeout.
//!
//! Locks are `flock`s, so they are visible across processes and released by the
//! OS if the holder dies.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{CourseKey, VersionId};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Attempts a non-waiting acquire makes before reporting contention. Covers
/// the instant an [`CourseLock::is_held`] probe holds the lock.
const CONTENTION_ATTEMPTS: u32 = 3;
const CONTENTION_PAUSE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
  Build,
  Promote,
}

impl LockScope {
  fn as_str(self) -> &'static str {
    match self {
      LockScope::Build => "build",
      LockScope::Promote => "promote",
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub course_key: CourseKey,
  pub scope: LockScope,
  pub version_id: Option<VersionId>,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("a build of {course_key} is already in progress (PID {pid}, version {version_id:?}, started {started_at_unix})")]
  BuildInProgress {
    course_key: CourseKey,
    pid: u32,
    version_id: Option<VersionId>,
    started_at_unix: u64,
  },

  #[error("{scope:?} lock for {course_key} is held (could not read lock metadata): {lock_path}")]
  ContentionUnknown {
    course_key: CourseKey,
    scope: LockScope,
    lock_path: PathBuf,
  },

  #[error("timed out after {waited:?} waiting for the {scope:?} lock of {course_key}")]
  Timeout {
    course_key: CourseKey,
    scope: LockScope,
    waited: Duration,
  },

  #[error("failed to create lock directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// An exclusive lock on one course scope. Released on drop.
#[derive(Debug)]
pub struct CourseLock {
  file: File,
  lock_path: PathBuf,
  course_key: CourseKey,
  scope: LockScope,
}

impl CourseLock {
  pub fn path_for(locks_dir: &Path, course_key: &CourseKey, scope: LockScope) -> PathBuf {
    locks_dir.join(format!("{}.{}.lock", course_key, scope.as_str()))
  }

  /// Take the lock without waiting for its holder.
  ///
  /// Contention is re-checked a few times over a few milliseconds, so a
  /// momentary probe is not mistaken for a running build.
  pub fn try_acquire(
    locks_dir: &Path,
    course_key: &CourseKey,
    scope: LockScope,
    version_id: Option<VersionId>,
  ) -> Result<Self, LockError> {
    for attempt in 1..=CONTENTION_ATTEMPTS {
      if let Some(lock) = Self::try_acquire_inner(locks_dir, course_key, scope, version_id)? {
        return Ok(lock);
      }
      if attempt < CONTENTION_ATTEMPTS {
        std::thread::sleep(CONTENTION_PAUSE);
      }
    }
    Err(Self::read_contention_error(
      &Self::path_for(locks_dir, course_key, scope),
      course_key,
      scope,
    ))
  }

  /// Take the lock, polling until `timeout` elapses.
  ///
  /// Blocks the calling thread; run from blocking contexts only.
  pub fn acquire_with_timeout(
    locks_dir: &Path,
    course_key: &CourseKey,
    scope: LockScope,
    timeout: Duration,
  ) -> Result<Self, LockError> {
    let start = Instant::now();
    loop {
      if let Some(lock) = Self::try_acquire_inner(locks_dir, course_key, scope, None)? {
        return Ok(lock);
      }
      if start.elapsed() >= timeout {
        return Err(LockError::Timeout {
          course_key: course_key.clone(),
          scope,
          waited: start.elapsed(),
        });
      }
      std::thread::sleep(POLL_INTERVAL);
    }
  }

  fn try_acquire_inner(
    locks_dir: &Path,
    course_key: &CourseKey,
    scope: LockScope,
    version_id: Option<VersionId>,
  ) -> Result<Option<Self>, LockError> {
    if !locks_dir.exists() {
      std::fs::create_dir_all(locks_dir).map_err(LockError::CreateDir)?;
    }

    let lock_path = Self::path_for(locks_dir, course_key, scope);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(LockError::OpenFile)?;

    if let Err(err) = try_lock_exclusive(&file) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Ok(None);
      }
      return Err(LockError::LockFailed(err));
    }

    let lock = CourseLock {
      file,
      lock_path,
      course_key: course_key.clone(),
      scope,
    };
    lock.write_metadata(version_id)?;
    debug!(course_key = %course_key, scope = scope.as_str(), "lock acquired");
    Ok(Some(lock))
  }

  /// Record the version this lock is working on, once it is known.
  pub fn set_version(&self, version_id: VersionId) -> Result<(), LockError> {
    self.write_metadata(Some(version_id))
  }

  fn write_metadata(&self, version_id: Option<VersionId>) -> Result<(), LockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      course_key: self.course_key.clone(),
      scope: self.scope,
      version_id,
    };

    self.file.set_len(0).map_err(LockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(&self.file);
    writer.seek(SeekFrom::Start(0)).map_err(LockError::WriteMetadata)?;
    serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(LockError::WriteMetadata)?;
    Ok(())
  }

  #[cfg(test)]
  fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  /// Reads whatever metadata the last holder left behind.
  fn peek_metadata(locks_dir: &Path, course_key: &CourseKey, scope: LockScope) -> Option<LockMetadata> {
    let content = std::fs::read_to_string(Self::path_for(locks_dir, course_key, scope)).ok()?;
    serde_json::from_str(&content).ok()
  }

  /// Whether any process currently holds the lock.
  ///
  /// A lock whose recorded holder has exited is free without further checks.
  /// Otherwise probes with a non-blocking lock on a separate handle that is
  /// released at once; the holder's metadata is left untouched.
  pub fn is_held(locks_dir: &Path, course_key: &CourseKey, scope: LockScope) -> Result<bool, LockError> {
    if let Some(metadata) = Self::peek_metadata(locks_dir, course_key, scope)
      && !process_alive(metadata.pid)
    {
      return Ok(false);
    }
    let file = match File::open(Self::path_for(locks_dir, course_key, scope)) {
      Ok(file) => file,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
      Err(e) => return Err(LockError::OpenFile(e)),
    };
    match try_lock_exclusive(&file) {
      Ok(()) => Ok(false),
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
      Err(e) => Err(LockError::LockFailed(e)),
    }
  }

  fn read_contention_error(lock_path: &Path, course_key: &CourseKey, scope: LockScope) -> LockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
        && scope == LockScope::Build
      {
        return LockError::BuildInProgress {
          course_key: metadata.course_key,
          pid: metadata.pid,
          version_id: metadata.version_id,
          started_at_unix: metadata.started_at_unix,
        };
      }
    }

    if scope == LockScope::Build {
      return LockError::BuildInProgress {
        course_key: course_key.clone(),
        pid: 0,
        version_id: None,
        started_at_unix: 0,
      };
    }

    LockError::ContentionUnknown {
      course_key: course_key.clone(),
      scope,
      lock_path: lock_path.to_path_buf(),
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  pub fn course_key(&self) -> &CourseKey {
    &self.course_key
  }
}

/// Whether a process with `pid` still exists on this host.
///
/// Used to tell a live holder from a record left behind by a crashed one.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
  let Some(pid) = i32::try_from(pid).ok().and_then(rustix::process::Pid::from_raw) else {
    return false;
  };
  match rustix::process::test_kill_process(pid) {
    Ok(()) => true,
    Err(e) => e != rustix::io::Errno::SRCH,
  }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
  true
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  file.try_lock().map_err(|e| match e {
    std::fs::TryLockError::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
    std::fs::TryLockError::Error(e) => e,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn key(s: &str) -> CourseKey {
    CourseKey::new(s).unwrap()
  }

  #[test]
  fn acquire_build_lock() {
    let temp = TempDir::new().unwrap();
    let lock = CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, None).unwrap();
    assert!(lock.lock_path().exists());
    assert_eq!(lock.lock_path(), temp.path().join("c1.build.lock"));
  }

  #[test]
  fn is_held_follows_guard() {
    let temp = TempDir::new().unwrap();
    assert!(!CourseLock::is_held(temp.path(), &key("c1"), LockScope::Build).unwrap());
    let lock = CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, Some(VersionId(4))).unwrap();
    assert!(CourseLock::is_held(temp.path(), &key("c1"), LockScope::Build).unwrap());
    drop(lock);
    assert!(!CourseLock::is_held(temp.path(), &key("c1"), LockScope::Build).unwrap());
    let meta = CourseLock::peek_metadata(temp.path(), &key("c1"), LockScope::Build).unwrap();
    assert_eq!(meta.version_id, Some(VersionId(4)));
  }

  #[test]
  fn second_build_lock_reports_in_progress() {
    let temp = TempDir::new().unwrap();
    let _held = CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, Some(VersionId(3))).unwrap();

    let err = CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, None).unwrap_err();
    match err {
      LockError::BuildInProgress { pid, version_id, .. } => {
        assert_eq!(pid, std::process::id());
        assert_eq!(version_id, Some(VersionId(3)));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn momentary_holder_is_not_a_running_build() {
    let temp = TempDir::new().unwrap();
    let path = CourseLock::path_for(temp.path(), &key("c1"), LockScope::Build);
    drop(CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, None).unwrap());

    let probe = File::open(&path).unwrap();
    try_lock_exclusive(&probe).unwrap();
    let releaser = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(2));
      drop(probe);
    });

    let lock = CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, Some(VersionId(2)));
    releaser.join().unwrap();
    assert!(lock.is_ok(), "got {:?}", lock.err());
  }

  #[test]
  #[cfg(unix)]
  fn lock_of_exited_holder_is_free() {
    let temp = TempDir::new().unwrap();
    let path = CourseLock::path_for(temp.path(), &key("c1"), LockScope::Build);
    let metadata = LockMetadata {
      version: 1,
      pid: u32::MAX - 1,
      started_at_unix: 0,
      course_key: key("c1"),
      scope: LockScope::Build,
      version_id: Some(VersionId(1)),
    };
    std::fs::write(&path, serde_json::to_string(&metadata).unwrap()).unwrap();

    assert!(!CourseLock::is_held(temp.path(), &key("c1"), LockScope::Build).unwrap());
  }

  #[test]
  fn courses_lock_independently() {
    let temp = TempDir::new().unwrap();
    let _a = CourseLock::try_acquire(temp.path(), &key("a"), LockScope::Build, None).unwrap();
    let _b = CourseLock::try_acquire(temp.path(), &key("b"), LockScope::Build, None).unwrap();
    let _a_promote = CourseLock::try_acquire(temp.path(), &key("a"), LockScope::Promote, None).unwrap();
  }

  #[test]
  fn metadata_tracks_version() {
    let temp = TempDir::new().unwrap();
    let lock = CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, None).unwrap();
    assert_eq!(lock.read_metadata().unwrap().version_id, None);

    lock.set_version(VersionId(12)).unwrap();
    let metadata = lock.read_metadata().unwrap();
    assert_eq!(metadata.version_id, Some(VersionId(12)));
    assert_eq!(metadata.pid, std::process::id());
    assert_eq!(metadata.scope, LockScope::Build);
  }

  #[test]
  fn lock_released_on_drop() {
    let temp = TempDir::new().unwrap();
    {
      let _lock = CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, None).unwrap();
    }
    CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Build, None).unwrap();
  }

  #[test]
  fn promote_lock_times_out_while_held() {
    let temp = TempDir::new().unwrap();
    let _held = CourseLock::try_acquire(temp.path(), &key("c1"), LockScope::Promote, None).unwrap();

    let err = CourseLock::acquire_with_timeout(temp.path(), &key("c1"), LockScope::Promote, Duration::from_millis(120))
      .unwrap_err();
    assert!(matches!(err, LockError::Timeout { scope: LockScope::Promote, .. }));
  }

  #[test]
  fn promote_lock_waits_for_release() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().to_path_buf();
    let held = CourseLock::try_acquire(&dir, &key("c1"), LockScope::Promote, None).unwrap();

    let releaser = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(100));
      drop(held);
    });

    CourseLock::acquire_with_timeout(temp.path(), &key("c1"), LockScope::Promote, Duration::from_secs(5)).unwrap();
    releaser.join().unwrap();
  }

  #[test]
  #[cfg(unix)]
  fn current_process_is_alive() {
    assert!(process_alive(std::process::id()));
  }
}
