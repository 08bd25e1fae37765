use tracing::{error, info, warn};

use super::pipeline::load_config;
use super::{BuildError, Orchestrator};
use crate::record::{BuildRecord, BuildState};
use crate::store::PublishOutcome;
use crate::types::{CourseKey, VersionId};

impl Orchestrator {
  /// Make a stored version live locally, then PUBLISH it on every grader.
  ///
  /// Without `version_id` the stored version is published, or the live one
  /// again when nothing is stored. Local promotion failures leave the record
  /// PUBLISH_FAILED; grader failures are collected into its publish report.
  /// Publishing an already live version re-runs the grader phase only.
  pub async fn publish(&self, course_key: &CourseKey, version_id: Option<VersionId>) -> Result<BuildRecord, BuildError> {
    let version_id = match version_id {
      Some(v) => v,
      None => self.default_publish_version(course_key)?,
    };

    let mut record = self.records.load(course_key, version_id)?;
    if !matches!(
      record.state,
      BuildState::Built | BuildState::Published | BuildState::PublishFailed
    ) {
      return Err(BuildError::NotPublishable {
        course_key: course_key.clone(),
        version_id,
        state: record.state,
      });
    }

    record.error = None;
    record.publish_report = None;
    record.transition(BuildState::Publishing);
    self.records.save(&record)?;

    let store = self.store.clone();
    let key = course_key.clone();
    let promoted = tokio::task::spawn_blocking(move || store.promote_to_publish(&key, version_id)).await?;
    match promoted {
      Ok(PublishOutcome::Promoted { previous }) => {
        info!(
          course_key = %course_key,
          version_id = %version_id,
          previous = ?previous.map(|v| v.0),
          "version is live"
        );
      }
      Ok(PublishOutcome::AlreadyLive) => {
        info!(course_key = %course_key, version_id = %version_id, "version already live");
      }
      Err(e) => {
        error!(course_key = %course_key, version_id = %version_id, error = %e, "local publish failed");
        record.fail(BuildState::PublishFailed, e.to_string());
        self.persist(&record);
        return Ok(record);
      }
    }

    let publish_path = self.store.publish_path(course_key);
    let report = match load_config(&publish_path, course_key, version_id) {
      Ok(config) => self.grader.publish_all(&config, self.course_id(course_key), version_id).await,
      Err(e) => {
        record.fail(BuildState::PublishFailed, format!("cannot read published configuration: {e}"));
        self.persist(&record);
        return Ok(record);
      }
    };

    match report {
      Ok(report) if report.is_success() => {
        record.publish_report = Some(report);
        record.transition(BuildState::Published);
      }
      Ok(report) => {
        let summary = report.summary();
        warn!(course_key = %course_key, version_id = %version_id, failures = %summary, "grader publish incomplete");
        record.publish_report = Some(report);
        record.fail(BuildState::PublishFailed, summary);
      }
      Err(e) => {
        warn!(course_key = %course_key, version_id = %version_id, error = %e, "grader publish failed");
        record.fail(BuildState::PublishFailed, e.to_string());
      }
    }
    self.persist(&record);
    Ok(record)
  }

  fn default_publish_version(&self, course_key: &CourseKey) -> Result<VersionId, BuildError> {
    if let Some(stored) = self.store.stored_version(course_key)? {
      return Ok(stored.version_id);
    }
    match self.store.published_version(course_key)? {
      Some(live) => Ok(live.version_id),
      None => Err(BuildError::NothingToPublish(course_key.clone())),
    }
  }
}
