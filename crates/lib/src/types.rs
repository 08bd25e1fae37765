use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
  #[error("course key must not be empty")]
  Empty,

  #[error("invalid course key {0:?}: only letters, digits, '-' and '_' are allowed")]
  InvalidChar(String),

  #[error("invalid version id {0:?}")]
  InvalidVersion(String),
}

/// Stable identifier of a course.
///
/// Used as a directory and lock file name, so it is restricted to a slug.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CourseKey(String);

impl CourseKey {
  pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
    let key = key.into();
    if key.is_empty() {
      return Err(KeyError::Empty);
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
      return Err(KeyError::InvalidChar(key));
    }
    Ok(Self(key))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CourseKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for CourseKey {
  type Err = KeyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    CourseKey::new(s)
  }
}

impl<'de> Deserialize<'de> for CourseKey {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    CourseKey::new(raw).map_err(serde::de::Error::custom)
  }
}

/// Monotonically increasing build identifier, allocated per course.
///
/// Rendered zero-padded so that lexical and numeric order agree in file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl VersionId {
  pub fn next(self) -> Self {
    VersionId(self.0 + 1)
  }
}

impl fmt::Display for VersionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:010}", self.0)
  }
}

impl FromStr for VersionId {
  type Err = KeyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.trim()
      .parse::<u64>()
      .map(VersionId)
      .map_err(|_| KeyError::InvalidVersion(s.to_string()))
  }
}
