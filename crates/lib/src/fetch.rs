//! Source fetching.
//!
//! Cloning and pulling repositories is left to an outside collaborator; the
//! build pipeline only needs the revision copied into its staging directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{DEPOSIT_DIR, VCS_DIRS};
use crate::settings::Settings;
use crate::types::CourseKey;
use crate::util::fs::{TreeError, copy_tree};

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("no source configured for course {0}")]
  NoSource(CourseKey),

  #[error("source directory {path} does not exist")]
  SourceNotFound { path: PathBuf },

  #[error("no source configured and nothing deposited in {path}")]
  NothingDeposited { path: PathBuf },

  #[error(transparent)]
  Copy(#[from] TreeError),

  #[error("fetch task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// What a fetch put into the staging directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
  /// Source revision, e.g. a commit hash, when one could be determined.
  pub revision: Option<String>,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
  /// Deposit the current source of `course_key` into the empty directory `dest`.
  async fn fetch(&self, course_key: &CourseKey, dest: &Path) -> Result<FetchOutcome, FetchError>;
}

/// Copies each course's configured source directory.
///
/// Courses without one are taken from the deposit directory, when set.
#[derive(Debug, Clone, Default)]
pub struct LocalDirFetcher {
  sources: BTreeMap<CourseKey, PathBuf>,
  deposit: Option<DepositFetcher>,
}

impl LocalDirFetcher {
  pub fn new(sources: BTreeMap<CourseKey, PathBuf>) -> Self {
    Self { sources, deposit: None }
  }

  /// Sources of every course in `settings` that names one; the rest come from
  /// `<root>/deposit/<key>/`.
  pub fn from_settings(settings: &Settings) -> Self {
    let sources = settings
      .courses
      .iter()
      .filter_map(|c| {
        let key = CourseKey::new(c.key.as_str()).ok()?;
        Some((key, c.source.clone()?))
      })
      .collect();
    Self {
      sources,
      deposit: Some(DepositFetcher::new(settings.root.join(DEPOSIT_DIR))),
    }
  }

  pub fn single(course_key: CourseKey, source: PathBuf) -> Self {
    Self::new(BTreeMap::from([(course_key, source)]))
  }
}

#[async_trait]
impl SourceFetcher for LocalDirFetcher {
  async fn fetch(&self, course_key: &CourseKey, dest: &Path) -> Result<FetchOutcome, FetchError> {
    let Some(source) = self.sources.get(course_key) else {
      return match &self.deposit {
        Some(deposit) => deposit.fetch(course_key, dest).await,
        None => Err(FetchError::NoSource(course_key.clone())),
      };
    };
    if !source.is_dir() {
      return Err(FetchError::SourceNotFound { path: source.clone() });
    }
    copy_source(course_key, source, dest).await
  }
}

/// Copies the checkout an outside collaborator keeps at `<root>/<key>/`.
///
/// The collaborator clones and pulls into that directory between builds; each
/// build takes a copy, so the checkout survives for the next pull.
#[derive(Debug, Clone)]
pub struct DepositFetcher {
  root: PathBuf,
}

impl DepositFetcher {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn deposit_path(&self, course_key: &CourseKey) -> PathBuf {
    self.root.join(course_key.as_str())
  }
}

#[async_trait]
impl SourceFetcher for DepositFetcher {
  async fn fetch(&self, course_key: &CourseKey, dest: &Path) -> Result<FetchOutcome, FetchError> {
    let deposit = self.deposit_path(course_key);
    let populated = fs::read_dir(&deposit).map(|mut d| d.next().is_some()).unwrap_or(false);
    if !populated {
      return Err(FetchError::NothingDeposited { path: deposit });
    }
    debug!(course_key = %course_key, deposit = %deposit.display(), "using deposited source");
    copy_source(course_key, &deposit, dest).await
  }
}

async fn copy_source(course_key: &CourseKey, source: &Path, dest: &Path) -> Result<FetchOutcome, FetchError> {
  let source = dunce::canonicalize(source).map_err(|_| FetchError::SourceNotFound {
    path: source.to_path_buf(),
  })?;

  let revision = git_revision(&source);
  let dest_owned = dest.to_path_buf();
  let src = source.clone();
  let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dest_owned, VCS_DIRS)).await??;

  info!(
    course_key = %course_key,
    source = %source.display(),
    entries = copied,
    revision = ?revision,
    "fetched course source"
  );
  Ok(FetchOutcome { revision })
}

/// Commit the working tree at `dir` has checked out, read from `.git` directly.
pub fn git_revision(dir: &Path) -> Option<String> {
  let git_dir = dir.join(".git");
  let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
  let head = head.trim();

  let Some(reference) = head.strip_prefix("ref: ") else {
    return is_object_id(head).then(|| head.to_string());
  };
  if let Ok(id) = fs::read_to_string(git_dir.join(reference)) {
    let id = id.trim();
    return is_object_id(id).then(|| id.to_string());
  }

  let packed = fs::read_to_string(git_dir.join("packed-refs")).ok()?;
  packed.lines().find_map(|line| {
    let (id, name) = line.split_once(' ')?;
    (name == reference && is_object_id(id)).then(|| id.to_string())
  })
}

fn is_object_id(s: &str) -> bool {
  matches!(s.len(), 40 | 64) && s.chars().all(|c| c.is_ascii_hexdigit())
}
