use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use super::log::BuildLog;
use super::plan::{BuildPlan, build_env};
use super::{BuildError, BuildOptions, BuildTicket, Orchestrator};
use crate::config::{AppsMeta, ConfigError, CourseConfig};
use crate::consts::APPS_META;
use crate::fetch::{LocalDirFetcher, SourceFetcher};
use crate::lock::{CourseLock, LockScope};
use crate::record::{BuildRecord, BuildState};
use crate::runner::BuildRequest;
use crate::settings::PublishMode;
use crate::store::StoreInput;
use crate::types::{CourseKey, VersionId};
use crate::util::fs::check_self_contained;

impl Orchestrator {
  /// Start a build of `course_key`.
  ///
  /// Returns once the course's build lock is held, the version allocated and
  /// its RUNNING record written; the pipeline continues in a background task
  /// that owns the lock.
  pub fn submit_build(&self, course_key: &CourseKey, options: BuildOptions) -> Result<BuildTicket, BuildError> {
    let lock = CourseLock::try_acquire(&self.store.locks_dir(), course_key, LockScope::Build, None)?;
    let version_id = self.records.allocate_version(course_key)?;
    lock.set_version(version_id)?;

    let record = BuildRecord::running(course_key.clone(), version_id);
    self.records.save(&record)?;
    info!(course_key = %course_key, version_id = %version_id, "build submitted");

    let this = self.clone();
    let handle = tokio::spawn(async move { this.drive(lock, record, options).await });
    Ok(BuildTicket {
      course_key: course_key.clone(),
      version_id,
      handle,
    })
  }

  /// Submit a build and wait for it to finish.
  pub async fn run_build(&self, course_key: &CourseKey, options: BuildOptions) -> Result<BuildRecord, BuildError> {
    self.submit_build(course_key, options)?.wait().await
  }

  async fn drive(&self, lock: CourseLock, mut record: BuildRecord, options: BuildOptions) -> BuildRecord {
    let course_key = record.course_key.clone();
    let version_id = record.version_id;
    let mut log = BuildLog::new(course_key.clone(), version_id);

    match self.build(&mut record, &mut log, &options).await {
      Ok(()) => {
        log.note(format!("Build {version_id} stored"));
        record.transition(BuildState::Built);
        if let Err(e) = self.store.remove_staging(&course_key, version_id) {
          warn!(course_key = %course_key, version_id = %version_id, error = %e, "failed to remove staging tree");
        }
      }
      Err(e) => {
        log.note(format!("Build failed: {e}"));
        error!(course_key = %course_key, version_id = %version_id, error = %e, "build failed");
        record.fail(BuildState::Failed, e.to_string());
      }
    }
    record.log = log.into_string();
    self.persist(&record);

    match self.records.prune(&course_key, self.settings.keep_records) {
      Ok(pruned) if !pruned.is_empty() => info!(course_key = %course_key, pruned = pruned.len(), "pruned build records"),
      Ok(_) => {}
      Err(e) => warn!(course_key = %course_key, error = %e, "failed to prune build records"),
    }
    drop(lock);

    let mode = options
      .publish_mode
      .unwrap_or_else(|| self.settings.publish_mode_for(course_key.as_str()));
    if record.state != BuildState::Built || mode == PublishMode::Deferred {
      return record;
    }
    match self.publish(&course_key, Some(version_id)).await {
      Ok(published) => published,
      Err(e) => {
        error!(course_key = %course_key, version_id = %version_id, error = %e, "publish after build failed");
        self.records.load(&course_key, version_id).unwrap_or(record)
      }
    }
  }

  pub(super) fn persist(&self, record: &BuildRecord) {
    if let Err(e) = self.records.save(record) {
      error!(
        course_key = %record.course_key,
        version_id = %record.version_id,
        error = %e,
        "failed to save build record"
      );
    }
  }

  async fn build(&self, record: &mut BuildRecord, log: &mut BuildLog, options: &BuildOptions) -> Result<(), BuildError> {
    let course_key = record.course_key.clone();
    let version_id = record.version_id;

    let staging = self.store.prepare_staging(&course_key, version_id)?;
    log.note(format!("Fetching {course_key} into {}", staging.display()));
    let fetcher: Arc<dyn SourceFetcher> = match &options.source {
      Some(source) => Arc::new(LocalDirFetcher::single(course_key.clone(), source.clone())),
      None => Arc::clone(&self.fetcher),
    };
    let fetched = fetcher.fetch(&course_key, &staging).await?;
    if let Some(revision) = &fetched.revision {
      log.note(format!("Source revision {revision}"));
    }
    record.revision = fetched.revision;
    self.persist(record);

    if options.skip_build {
      log.note("Build step skipped");
    } else {
      self.run_runner(&course_key, version_id, &staging, options, log).await?;
    }

    check_self_contained(&staging)?;

    let config = load_config(&staging, &course_key, version_id)?;
    for warning in &config.warnings {
      log.warn(warning);
    }
    log.note(format!(
      "Course configuration valid: {} modules, {} exercise configs",
      config.course.modules.len(),
      config.exercise_keys.len()
    ));

    let targets = config.configure_targets();
    let exercise_defaults = if targets.is_empty() {
      Default::default()
    } else {
      log.note(format!("Storing version on {} grader endpoint(s)", targets.len()));
      self
        .grader
        .store_all(&config, self.course_id(&course_key), version_id)
        .await?
    };

    let store = self.store.clone();
    let input = StoreInput {
      revision: record.revision.clone(),
      exercise_defaults,
    };
    let key = course_key.clone();
    let meta =
      tokio::task::spawn_blocking(move || store.promote_to_store(&key, version_id, &staging, input)).await??;
    log.note(format!("Stored tree {}", meta.tree_hash));
    Ok(())
  }

  async fn run_runner(
    &self,
    course_key: &CourseKey,
    version_id: VersionId,
    staging: &Path,
    options: &BuildOptions,
    log: &mut BuildLog,
  ) -> Result<(), BuildError> {
    let meta = AppsMeta::load(staging).map_err(|source| ConfigError::Read {
      path: staging.join(APPS_META),
      source,
    })?;
    let plan = BuildPlan::resolve(
      options.image.as_deref(),
      options.command.as_deref(),
      Some(&meta),
      &self.settings,
      log,
    );
    if !plan.needs_build() {
      log.note("Build image is empty, assuming no build is needed");
      return Ok(());
    }

    let request = BuildRequest {
      course_key: course_key.clone(),
      version_id,
      source_path: staging.to_path_buf(),
      image: Some(plan.image),
      command: plan.command,
      env: build_env(&self.settings, course_key),
      timeout: self.settings.build_timeout,
    };
    log.note(format!("Running {} build", self.runner.name()));
    let output = match self.runner.run(&request).await {
      Ok(output) => output,
      Err(e) => {
        log.output(e.log());
        return Err(e.into());
      }
    };
    log.output(&output.log);
    if !output.success() {
      return Err(BuildError::BuildFailed {
        exit_code: output.exit_code,
      });
    }
    Ok(())
  }
}

pub(super) fn load_config(dir: &Path, course_key: &CourseKey, version_id: VersionId) -> Result<CourseConfig, ConfigError> {
  CourseConfig::load(dir, course_key.as_str(), Some(version_id))
}
