//! Build orchestration.
//!
//! Drives one course version through fetch, build, validation, grader STORE,
//! store promotion and, immediately or later, publish:
//!
//! ```text
//! IDLE → RUNNING (build lock held) → FAILED
//!                                  → BUILT → PUBLISHING → PUBLISHED
//!                                                       → PUBLISH_FAILED
//! ```
//!
//! At most one build per course runs at a time, across processes. A second
//! submission is rejected with [`LockError::BuildInProgress`], never queued.

mod log;
mod pipeline;
mod plan;
mod publish;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ConfigError;
use crate::consts::STATE_DIR;
use crate::fetch::{FetchError, LocalDirFetcher, SourceFetcher};
use crate::grader::{GraderClient, GraderError, GraderTransport, HttpTransport};
use crate::lock::LockError;
use crate::record::{BuildRecord, BuildState, RecordError, RecordStore};
use crate::runner::{self, BuildRunner, RunnerError};
use crate::settings::{PublishMode, Settings};
use crate::store::{StoreError, VersionStore};
use crate::types::{CourseKey, VersionId};
use crate::util::fs::TreeError;

pub use log::BuildLog;
pub use plan::{BuildPlan, build_env};
pub use status::{CourseState, CourseStatus};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Record(#[from] RecordError),

  #[error("fetch failed: {0}")]
  Fetch(#[from] FetchError),

  #[error("build runner failed: {0}")]
  Runner(#[from] RunnerError),

  #[error("build command failed with exit code {}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
  BuildFailed { exit_code: Option<i32> },

  #[error("built tree is not self-contained: {0}")]
  NotSelfContained(#[from] TreeError),

  #[error("invalid course configuration: {0}")]
  Config(#[from] ConfigError),

  #[error("grader sync failed: {0}")]
  Grader(#[from] GraderError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("version {version_id} of {course_key} is {state}, not publishable")]
  NotPublishable {
    course_key: CourseKey,
    version_id: VersionId,
    state: BuildState,
  },

  #[error("nothing stored or published for {0}")]
  NothingToPublish(CourseKey),

  #[error("build task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Build from this directory instead of the course's configured source.
  pub source: Option<PathBuf>,
  /// Skip the build step and take the fetched tree as built.
  pub skip_build: bool,
  pub image: Option<String>,
  pub command: Option<String>,
  /// Overrides the configured publish mode for this build.
  pub publish_mode: Option<PublishMode>,
}

/// A submitted build: the allocated version and the task running it.
#[derive(Debug)]
pub struct BuildTicket {
  pub course_key: CourseKey,
  pub version_id: VersionId,
  pub handle: JoinHandle<BuildRecord>,
}

impl BuildTicket {
  /// Wait for the pipeline, publish included when immediate, to finish.
  pub async fn wait(self) -> Result<BuildRecord, BuildError> {
    Ok(self.handle.await?)
  }
}

/// Entry point for building, publishing and inspecting courses.
#[derive(Clone)]
pub struct Orchestrator {
  settings: Arc<Settings>,
  store: VersionStore,
  records: RecordStore,
  runner: Arc<dyn BuildRunner>,
  fetcher: Arc<dyn SourceFetcher>,
  grader: GraderClient,
}

impl Orchestrator {
  /// Wire up the runner, fetcher and grader transport named in `settings`.
  pub fn new(settings: Settings) -> Self {
    let runner = runner::from_settings(&settings.runner);
    let fetcher = Arc::new(LocalDirFetcher::from_settings(&settings));
    let transport = Arc::new(HttpTransport::new(settings.grader_token.clone()));
    let store = VersionStore::new(&settings.root, settings.filelock_timeout, settings.keep_retired);
    let records = RecordStore::new(settings.root.join(STATE_DIR).join("builds"));
    let grader = GraderClient::new(transport, settings.content_url.clone());
    Self {
      settings: Arc::new(settings),
      store,
      records,
      runner,
      fetcher,
      grader,
    }
  }

  pub fn with_runner(mut self, runner: Arc<dyn BuildRunner>) -> Self {
    self.runner = runner;
    self
  }

  pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
    self.fetcher = fetcher;
    self
  }

  pub fn with_grader_transport(mut self, transport: Arc<dyn GraderTransport>) -> Self {
    self.grader = GraderClient::new(transport, self.settings.content_url.clone());
    self
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn store(&self) -> &VersionStore {
    &self.store
  }

  pub fn records(&self) -> &RecordStore {
    &self.records
  }

  fn course_id(&self, course_key: &CourseKey) -> Option<u64> {
    self.settings.course(course_key.as_str()).and_then(|c| c.course_id)
  }

  /// Roll the live tree back to the newest retired version older than it.
  ///
  /// Graders keep whatever version they have.
  pub fn rollback(&self, course_key: &CourseKey) -> Result<VersionId, BuildError> {
    Ok(self.store.rollback(course_key)?)
  }
}
