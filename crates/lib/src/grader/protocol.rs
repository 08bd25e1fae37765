//! Messages exchanged with grader endpoints.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::archive::ArchiveError;
use crate::types::VersionId;

#[derive(Debug, Error)]
pub enum GraderError {
  #[error("course {course_key} has grader endpoints but no course_id")]
  MissingCourseId { course_key: String },

  #[error("failed to pack files for {url}: {source}")]
  Archive {
    url: String,
    #[source]
    source: ArchiveError,
  },

  #[error("could not reach {url}: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{url} answered {status}: {body}")]
  Status { url: String, status: u16, body: String },

  #[error("{url} returned an invalid response: {reason}")]
  InvalidResponse { url: String, reason: String },

  #[error("{url} returned an empty response on exercise configuration")]
  EmptyResponse { url: String },

  #[error("{url} has version {} stored, cannot publish {requested}", display_version(.stored))]
  VersionMismatch {
    url: String,
    requested: VersionId,
    stored: Option<VersionId>,
  },
}

fn display_version(version: &Option<VersionId>) -> String {
  version.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}

/// One exercise as sent in STORE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseData {
  pub key: String,
  pub spec: Value,
  pub config: Option<Value>,
  /// Archive names of this exercise's files.
  pub files: Vec<String>,
}

/// Phase one: hand a version to the grader without making it live.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRequest {
  pub url: String,
  pub course_id: u64,
  pub course_key: String,
  pub version_id: VersionId,
  pub course_spec: Value,
  pub exercises: Vec<ExerciseData>,
  pub archive: Vec<u8>,
}

/// Phase two: make the stored version live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
  pub url: String,
  pub course_id: u64,
  pub course_key: String,
  pub version_id: VersionId,
}

/// Outcome of PUBLISH on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EndpointStatus {
  Published,
  /// The endpoint published but reported per-exercise problems.
  Errors { errors: Vec<String> },
  VersionMismatch { stored: Option<VersionId> },
  Failed { error: String },
}

impl EndpointStatus {
  pub fn is_ok(&self) -> bool {
    matches!(self, EndpointStatus::Published)
  }
}

impl fmt::Display for EndpointStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EndpointStatus::Published => f.write_str("published"),
      EndpointStatus::Errors { errors } => write!(f, "published with errors: {}", errors.join("; ")),
      EndpointStatus::VersionMismatch { stored } => {
        write!(f, "version mismatch (endpoint has {})", display_version(stored))
      }
      EndpointStatus::Failed { error } => write!(f, "failed: {error}"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointReport {
  pub url: String,
  #[serde(flatten)]
  pub status: EndpointStatus,
}

/// Per-endpoint results of publishing one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
  pub endpoints: Vec<EndpointReport>,
}

impl PublishReport {
  pub fn is_success(&self) -> bool {
    self.endpoints.iter().all(|e| e.status.is_ok())
  }

  pub fn failures(&self) -> impl Iterator<Item = &EndpointReport> {
    self.endpoints.iter().filter(|e| !e.status.is_ok())
  }

  /// One line per failed endpoint.
  pub fn summary(&self) -> String {
    self
      .failures()
      .map(|e| format!("{}: {}", e.url, e.status))
      .collect::<Vec<_>>()
      .join("\n")
  }
}
