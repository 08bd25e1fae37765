//! In-process grader endpoint.
//!
//! Implements the endpoint side of the two-phase protocol: STORE replaces the
//! stored version, PUBLISH makes it live only when the requested version is the
//! stored one. Used by tests and by single-host setups embedding the library.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::protocol::{GraderError, PublishRequest, StoreRequest};
use super::transport::GraderTransport;
use crate::store::ExerciseDefaults;
use crate::types::VersionId;

/// What one endpoint holds for one course.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointState {
  pub stored: Option<StoredVersion>,
  pub published: Option<VersionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredVersion {
  pub version_id: VersionId,
  pub exercises: Vec<String>,
  /// Entry names found in the uploaded archive.
  pub files: Vec<String>,
}

#[derive(Debug, Default)]
pub struct LocalGrader {
  defaults: Map<String, Value>,
  state: Mutex<BTreeMap<(String, String), EndpointState>>,
}

impl LocalGrader {
  pub fn new() -> Self {
    Self::default()
  }

  /// Report `defaults` for every exercise on STORE.
  pub fn with_defaults(defaults: Map<String, Value>) -> Self {
    Self {
      defaults,
      ..Self::default()
    }
  }

  /// State of `course_key` at endpoint `url`.
  pub fn state(&self, url: &str, course_key: &str) -> EndpointState {
    self
      .state
      .lock()
      .ok()
      .and_then(|s| s.get(&(url.to_string(), course_key.to_string())).cloned())
      .unwrap_or_default()
  }

  fn with_state<T>(&self, url: &str, course_key: &str, f: impl FnOnce(&mut EndpointState) -> T) -> Result<T, GraderError> {
    let mut state = self.state.lock().map_err(|_| GraderError::InvalidResponse {
      url: url.to_string(),
      reason: "local grader state poisoned".to_string(),
    })?;
    Ok(f(state.entry((url.to_string(), course_key.to_string())).or_default()))
  }
}

fn archive_entries(url: &str, archive: &[u8]) -> Result<Vec<String>, GraderError> {
  let invalid = |e: std::io::Error| GraderError::InvalidResponse {
    url: url.to_string(),
    reason: format!("unreadable archive: {e}"),
  };
  let mut reader = tar::Archive::new(archive);
  let mut names = Vec::new();
  for entry in reader.entries().map_err(invalid)? {
    let entry = entry.map_err(invalid)?;
    names.push(entry.path().map_err(invalid)?.to_string_lossy().to_string());
  }
  Ok(names)
}

#[async_trait]
impl GraderTransport for LocalGrader {
  async fn store(&self, request: &StoreRequest) -> Result<ExerciseDefaults, GraderError> {
    let files = archive_entries(&request.url, &request.archive)?;
    let exercises: Vec<String> = request.exercises.iter().map(|e| e.key.clone()).collect();

    let defaults = exercises
      .iter()
      .map(|key| (key.clone(), Value::Object(self.defaults.clone())))
      .collect();

    self.with_state(&request.url, &request.course_key, |state| {
      state.stored = Some(StoredVersion {
        version_id: request.version_id,
        exercises,
        files,
      });
    })?;
    info!(
      url = %request.url,
      course_key = %request.course_key,
      version_id = %request.version_id,
      "grader stored version"
    );
    Ok(defaults)
  }

  async fn publish(&self, request: &PublishRequest) -> Result<Vec<String>, GraderError> {
    let requested = request.version_id;
    self.with_state(&request.url, &request.course_key, |state| {
      let stored = state.stored.as_ref().map(|s| s.version_id);
      if stored == Some(requested) {
        state.published = Some(requested);
        Ok(Vec::new())
      } else if state.published == Some(requested) {
        debug!(url = %request.url, version_id = %requested, "version already live on grader");
        Ok(Vec::new())
      } else {
        Err(GraderError::VersionMismatch {
          url: request.url.clone(),
          requested,
          stored,
        })
      }
    })?
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grader::protocol::ExerciseData;
  use serde_json::json;

  const URL: &str = "https://grader.example/configure";

  fn store(version: u64) -> StoreRequest {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_ustar();
    header.set_size(1);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "q1/config.yaml", &b"x"[..]).unwrap();

    StoreRequest {
      url: URL.to_string(),
      course_id: 1,
      course_key: "c1".to_string(),
      version_id: VersionId(version),
      course_spec: json!({}),
      exercises: vec![ExerciseData {
        key: "q1".to_string(),
        spec: json!({}),
        config: None,
        files: vec!["q1".to_string()],
      }],
      archive: builder.into_inner().unwrap(),
    }
  }

  fn publish(version: u64) -> PublishRequest {
    PublishRequest {
      url: URL.to_string(),
      course_id: 1,
      course_key: "c1".to_string(),
      version_id: VersionId(version),
    }
  }

  #[tokio::test]
  async fn publish_of_superseded_version_is_rejected() {
    let grader = LocalGrader::new();
    grader.store(&store(1)).await.unwrap();
    grader.store(&store(2)).await.unwrap();
    let before = grader.state(URL, "c1");

    let result = grader.publish(&publish(1)).await;

    assert!(matches!(
      result,
      Err(GraderError::VersionMismatch {
        requested: VersionId(1),
        stored: Some(VersionId(2)),
        ..
      })
    ));
    assert_eq!(grader.state(URL, "c1"), before);
    assert_eq!(before.published, None);
  }

  #[tokio::test]
  async fn publish_of_stored_version_goes_live() {
    let grader = LocalGrader::new();
    grader.store(&store(2)).await.unwrap();
    assert!(grader.publish(&publish(2)).await.unwrap().is_empty());

    let state = grader.state(URL, "c1");
    assert_eq!(state.published, Some(VersionId(2)));
    assert_eq!(state.stored.unwrap().files, vec!["q1/config.yaml"]);

    // Re-publishing the live version is a no-op success.
    assert!(grader.publish(&publish(2)).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn store_reports_defaults_per_exercise() {
    let mut defaults = Map::new();
    defaults.insert("max_points".to_string(), json!(5));
    let grader = LocalGrader::with_defaults(defaults);

    let returned = grader.store(&store(1)).await.unwrap();
    assert_eq!(returned["q1"], json!({"max_points": 5}));
  }

  #[tokio::test]
  async fn publish_without_store_is_mismatch() {
    let grader = LocalGrader::new();
    assert!(matches!(
      grader.publish(&publish(1)).await,
      Err(GraderError::VersionMismatch { stored: None, .. })
    ));
  }
}
