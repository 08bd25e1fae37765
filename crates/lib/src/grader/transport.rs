//! How STORE and PUBLISH reach an endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, warn};

use super::protocol::{GraderError, PublishRequest, StoreRequest};
use crate::store::ExerciseDefaults;
use crate::types::VersionId;

const RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];
const DEFAULT_RETRIES: u32 = 5;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(400);

#[async_trait]
pub trait GraderTransport: Send + Sync {
  /// STORE: returns the grader's default config values per exercise.
  async fn store(&self, request: &StoreRequest) -> Result<ExerciseDefaults, GraderError>;

  /// PUBLISH: returns per-exercise errors; empty means clean success.
  async fn publish(&self, request: &PublishRequest) -> Result<Vec<String>, GraderError>;
}

/// Multipart POSTs to the endpoint URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  token: Option<String>,
  retries: u32,
  backoff: Duration,
}

impl HttpTransport {
  pub fn new(token: Option<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      token,
      retries: DEFAULT_RETRIES,
      backoff: DEFAULT_BACKOFF,
    }
  }

  pub fn with_retry(mut self, retries: u32, backoff: Duration) -> Self {
    self.retries = retries;
    self.backoff = backoff;
    self
  }

  /// POST a freshly built form, retrying connection failures and 5xx
  /// gateway statuses with exponential backoff.
  async fn post(&self, url: &str, form: impl Fn() -> Form) -> Result<(StatusCode, String), GraderError> {
    let mut attempt = 0;
    loop {
      let mut request = self
        .client
        .post(url)
        .header("Prefer", "respond-async")
        .multipart(form());
      if let Some(token) = &self.token {
        request = request.bearer_auth(token);
      }

      let delay = self.backoff * 2u32.saturating_pow(attempt);
      match request.send().await {
        Ok(response) if RETRY_STATUSES.contains(&response.status().as_u16()) && attempt < self.retries => {
          warn!(url, status = response.status().as_u16(), attempt, "grader unavailable, retrying");
        }
        Ok(response) => {
          let status = response.status();
          let body = response.text().await.map_err(|source| GraderError::Request {
            url: url.to_string(),
            source,
          })?;
          debug!(url, status = status.as_u16(), bytes = body.len(), "grader responded");
          return Ok((status, body));
        }
        Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.retries => {
          warn!(url, error = %e, attempt, "grader unreachable, retrying");
        }
        Err(source) => {
          return Err(GraderError::Request {
            url: url.to_string(),
            source,
          });
        }
      }
      tokio::time::sleep(delay).await;
      attempt += 1;
    }
  }
}

#[async_trait]
impl GraderTransport for HttpTransport {
  async fn store(&self, request: &StoreRequest) -> Result<ExerciseDefaults, GraderError> {
    let course_spec = request.course_spec.to_string();
    let exercises = serde_json::to_string(&request.exercises).map_err(|e| GraderError::InvalidResponse {
      url: request.url.clone(),
      reason: e.to_string(),
    })?;
    let form = || {
      Form::new()
        .text("course_id", request.course_id.to_string())
        .text("course_key", request.course_key.clone())
        .text("version_id", request.version_id.0.to_string())
        .text("course_spec", course_spec.clone())
        .text("exercises", exercises.clone())
        .part(
          "files",
          Part::bytes(request.archive.clone())
            .file_name("files")
            .mime_str("application/octet-stream")
            .unwrap_or_else(|_| Part::bytes(request.archive.clone()).file_name("files")),
        )
    };

    let (status, body) = self.post(&request.url, form).await?;
    let value = interpret(&request.url, request.version_id, status, &body)?;
    match value {
      None => Ok(ExerciseDefaults::new()),
      Some(Value::Object(map)) => Ok(map.into_iter().collect()),
      Some(other) => Err(GraderError::InvalidResponse {
        url: request.url.clone(),
        reason: format!("expected an object of exercise defaults, got {other}"),
      }),
    }
  }

  async fn publish(&self, request: &PublishRequest) -> Result<Vec<String>, GraderError> {
    let form = || {
      Form::new()
        .text("course_id", request.course_id.to_string())
        .text("course_key", request.course_key.clone())
        .text("version_id", request.version_id.0.to_string())
        .text("publish", "true")
    };

    let (status, body) = self.post(&request.url, form).await?;
    Ok(match interpret(&request.url, request.version_id, status, &body)? {
      None => Vec::new(),
      Some(Value::Array(errors)) => errors
        .into_iter()
        .map(|e| match e {
          Value::String(s) => s,
          other => other.to_string(),
        })
        .collect(),
      Some(other) => vec![other.to_string()],
    })
  }
}

/// Map a response onto the protocol: `None` for an empty 200 body, the parsed
/// JSON otherwise; 409 or a `version_mismatch` code is a version mismatch.
fn interpret(url: &str, requested: VersionId, status: StatusCode, body: &str) -> Result<Option<Value>, GraderError> {
  let parsed: Option<Value> = if body.trim().is_empty() {
    None
  } else {
    serde_json::from_str(body).ok()
  };

  let mismatch_code = parsed
    .as_ref()
    .and_then(|v| v.get("code"))
    .and_then(Value::as_str)
    .is_some_and(|c| c == "version_mismatch");
  if status == StatusCode::CONFLICT || mismatch_code {
    let stored = parsed
      .as_ref()
      .and_then(|v| v.get("stored_version_id"))
      .and_then(Value::as_u64)
      .map(VersionId);
    return Err(GraderError::VersionMismatch {
      url: url.to_string(),
      requested,
      stored,
    });
  }

  if status != StatusCode::OK {
    return Err(GraderError::Status {
      url: url.to_string(),
      status: status.as_u16(),
      body: body.to_string(),
    });
  }

  match parsed {
    Some(value) => Ok(Some(value)),
    None if body.trim().is_empty() => Ok(None),
    None => Err(GraderError::InvalidResponse {
      url: url.to_string(),
      reason: format!("not JSON: {}", body.chars().take(200).collect::<String>()),
    }),
  }
}
