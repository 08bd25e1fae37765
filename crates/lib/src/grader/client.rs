use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::archive::build_archive;
use super::protocol::{EndpointReport, EndpointStatus, ExerciseData, GraderError, PublishReport, PublishRequest, StoreRequest};
use super::transport::GraderTransport;
use crate::config::CourseConfig;
use crate::store::ExerciseDefaults;
use crate::types::VersionId;

/// Runs the two protocol phases against every grader a course configures.
#[derive(Clone)]
pub struct GraderClient {
  transport: Arc<dyn GraderTransport>,
  content_url: String,
}

impl GraderClient {
  /// `content_url` is the base of derived model answer and template URLs.
  pub fn new(transport: Arc<dyn GraderTransport>, content_url: impl Into<String>) -> Self {
    Self {
      transport,
      content_url: content_url.into(),
    }
  }

  fn course_id(config: &CourseConfig, course_id: Option<u64>) -> Result<u64, GraderError> {
    course_id.ok_or_else(|| GraderError::MissingCourseId {
      course_key: config.course_key.clone(),
    })
  }

  /// STORE `version_id` on every endpoint. The first failing endpoint aborts.
  ///
  /// Returns the defaults graders chose for their exercises, minus fields the
  /// course sets explicitly.
  pub async fn store_all(
    &self,
    config: &CourseConfig,
    course_id: Option<u64>,
    version_id: VersionId,
  ) -> Result<ExerciseDefaults, GraderError> {
    let targets = config.configure_targets();
    if targets.is_empty() {
      return Ok(ExerciseDefaults::new());
    }
    let course_id = Self::course_id(config, course_id)?;
    let course_spec = config.course_spec();

    let mut defaults = ExerciseDefaults::new();
    for target in targets {
      let exercises: Vec<ExerciseData> = target
        .exercise_keys
        .iter()
        .map(|key| self.exercise_data(config, key))
        .collect();
      let archive = build_archive(&config.dir, &target.files).map_err(|source| GraderError::Archive {
        url: target.url.clone(),
        source,
      })?;

      let request = StoreRequest {
        url: target.url.clone(),
        course_id,
        course_key: config.course_key.clone(),
        version_id,
        course_spec: course_spec.clone(),
        exercises,
        archive,
      };
      info!(
        url = %target.url,
        course_key = %config.course_key,
        version_id = %version_id,
        exercises = request.exercises.len(),
        archive_bytes = request.archive.len(),
        "storing version on grader"
      );

      let returned = self.transport.store(&request).await?;
      if returned.is_empty() && !request.exercises.is_empty() {
        return Err(GraderError::EmptyResponse { url: target.url });
      }
      for exercise in &request.exercises {
        if let Some(values) = returned.get(&exercise.key) {
          defaults.insert(exercise.key.clone(), without_explicit(&exercise.spec, values));
        }
      }
    }
    Ok(defaults)
  }

  fn exercise_data(&self, config: &CourseConfig, key: &str) -> ExerciseData {
    let files = config
      .find_object(key)
      .and_then(|o| o.as_exercise())
      .and_then(|e| e.configure.as_ref())
      .map(|c| c.files.keys().cloned().collect())
      .unwrap_or_default();
    ExerciseData {
      key: key.to_string(),
      spec: config.exercise_spec(key, &self.content_url).unwrap_or(Value::Null),
      config: config.exercises.get(key).and_then(|e| serde_json::to_value(&e.data).ok()),
      files,
    }
  }

  /// PUBLISH `version_id` on every endpoint.
  ///
  /// Endpoint failures, version mismatches included, land in the report and
  /// do not stop the remaining endpoints.
  pub async fn publish_all(
    &self,
    config: &CourseConfig,
    course_id: Option<u64>,
    version_id: VersionId,
  ) -> Result<PublishReport, GraderError> {
    let targets = config.configure_targets();
    if targets.is_empty() {
      return Ok(PublishReport::default());
    }
    let course_id = Self::course_id(config, course_id)?;

    let mut report = PublishReport::default();
    for target in targets {
      let request = PublishRequest {
        url: target.url.clone(),
        course_id,
        course_key: config.course_key.clone(),
        version_id,
      };
      let status = match self.transport.publish(&request).await {
        Ok(errors) if errors.is_empty() => EndpointStatus::Published,
        Ok(errors) => EndpointStatus::Errors { errors },
        Err(GraderError::VersionMismatch { stored, .. }) => EndpointStatus::VersionMismatch { stored },
        Err(e) => EndpointStatus::Failed { error: e.to_string() },
      };
      if status.is_ok() {
        info!(url = %target.url, version_id = %version_id, "grader published version");
      } else {
        warn!(url = %target.url, version_id = %version_id, status = %status, "grader publish failed");
      }
      report.endpoints.push(EndpointReport {
        url: target.url,
        status,
      });
    }
    Ok(report)
  }
}

/// Keep only the default fields `explicit` does not already set.
pub fn without_explicit(explicit: &Value, defaults: &Value) -> Value {
  match (explicit, defaults) {
    (Value::Object(explicit), Value::Object(defaults)) => Value::Object(
      defaults
        .iter()
        .filter(|(k, _)| explicit.get(*k).is_none_or(Value::is_null))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    ),
    _ => defaults.clone(),
  }
}
