//! Service settings.
//!
//! Loaded from a TOML file (see [`settings_path`]); every field has a default so
//! an absent file yields a working local setup. `COURSEPRESS_ROOT` overrides the
//! data root from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::platform::paths::{root_dir, settings_path};

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read settings file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid settings file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("duplicate course key in settings: {0}")]
  DuplicateCourse(String),
}

/// Whether a successful build is published right after store promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
  #[default]
  Immediate,
  Deferred,
}

/// Maps a path as seen by this service to the same path on the container host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
  pub service: PathBuf,
  pub host: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunnerSettings {
  #[default]
  Local,
  Container {
    #[serde(default = "default_container_program")]
    program: String,
    #[serde(default)]
    path_mappings: Vec<PathMapping>,
    #[serde(default)]
    extra_args: Vec<String>,
  },
  Custom {
    program: PathBuf,
    #[serde(default)]
    args: Vec<String>,
  },
}

fn default_container_program() -> String {
  "docker".to_string()
}

/// Per-course registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSettings {
  pub key: String,
  /// Course id on the frontend; sent to build containers and graders.
  #[serde(default)]
  pub course_id: Option<u64>,
  /// Directory the local fetcher copies sources from.
  #[serde(default)]
  pub source: Option<PathBuf>,
  #[serde(default)]
  pub publish_mode: Option<PublishMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub root: PathBuf,
  pub static_url: String,
  pub static_host: String,
  pub content_url: String,
  pub default_image: String,
  pub default_command: Option<String>,
  #[serde(deserialize_with = "de_duration", serialize_with = "ser_duration")]
  pub build_timeout: Duration,
  #[serde(deserialize_with = "de_duration", serialize_with = "ser_duration")]
  pub filelock_timeout: Duration,
  pub publish_mode: PublishMode,
  pub keep_records: usize,
  pub keep_retired: usize,
  pub grader_token: Option<String>,
  pub runner: RunnerSettings,
  pub courses: Vec<CourseSettings>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      root: root_dir(),
      static_url: "/static".to_string(),
      static_host: String::new(),
      content_url: String::new(),
      default_image: "apluslms/compile-rst:1.6".to_string(),
      default_command: None,
      build_timeout: Duration::from_secs(30 * 60),
      filelock_timeout: Duration::from_secs(120),
      publish_mode: PublishMode::Immediate,
      keep_records: 10,
      keep_retired: 1,
      grader_token: None,
      runner: RunnerSettings::Local,
      courses: Vec::new(),
    }
  }
}

impl Settings {
  /// Load settings from the default location.
  pub fn load_default() -> Result<Self, SettingsError> {
    Self::load(&settings_path())
  }

  /// Load settings from `path`. A missing file yields the defaults.
  pub fn load(path: &Path) -> Result<Self, SettingsError> {
    let mut settings = match std::fs::read_to_string(path) {
      Ok(content) => Self::from_toml(&content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
      })?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
      Err(source) => {
        return Err(SettingsError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    if let Ok(root) = std::env::var("COURSEPRESS_ROOT") {
      settings.root = PathBuf::from(root);
    }

    settings.validate()?;
    Ok(settings)
  }

  pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Defaults rooted at `root`; used by tests and embedders.
  pub fn with_root(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      ..Settings::default()
    }
  }

  fn validate(&self) -> Result<(), SettingsError> {
    let mut seen = std::collections::HashSet::new();
    for course in &self.courses {
      if !seen.insert(course.key.as_str()) {
        return Err(SettingsError::DuplicateCourse(course.key.clone()));
      }
    }
    Ok(())
  }

  pub fn course(&self, key: &str) -> Option<&CourseSettings> {
    self.courses.iter().find(|c| c.key == key)
  }

  pub fn publish_mode_for(&self, key: &str) -> PublishMode {
    self
      .course(key)
      .and_then(|c| c.publish_mode)
      .unwrap_or(self.publish_mode)
  }

  /// URL path (no host) of a course's static files, e.g. `/static/c1`.
  pub fn static_url_path(&self, course_key: &str) -> String {
    format!("{}/{}", self.static_url.trim_end_matches('/'), course_key)
  }

  /// Absolute URL of a course's static files.
  pub fn static_content_host(&self, course_key: &str) -> String {
    format!("{}{}", self.static_host.trim_end_matches('/'), self.static_url_path(course_key))
  }
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn ser_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
  S: Serializer,
{
  serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  #[test]
  fn parses_full_settings() {
    let settings = Settings::from_toml(
      r#"
        root = "/srv/coursepress"
        static_url = "/static/"
        static_host = "https://courses.example.com"
        build_timeout = "10m"
        publish_mode = "deferred"

        [runner]
        kind = "container"
        path_mappings = [{ service = "/srv/coursepress", host = "/data/coursepress" }]

        [[courses]]
        key = "c1"
        course_id = 7
        source = "/src/c1"
      "#,
    )
    .unwrap();

    assert_eq!(settings.root, PathBuf::from("/srv/coursepress"));
    assert_eq!(settings.build_timeout, Duration::from_secs(600));
    assert_eq!(settings.publish_mode, PublishMode::Deferred);
    assert!(matches!(settings.runner, RunnerSettings::Container { ref program, .. } if program == "docker"));
    assert_eq!(settings.course("c1").unwrap().course_id, Some(7));
    assert_eq!(settings.static_url_path("c1"), "/static/c1");
    assert_eq!(
      settings.static_content_host("c1"),
      "https://courses.example.com/static/c1"
    );
  }

  #[test]
  fn invalid_duration_is_rejected() {
    let result = Settings::from_toml(r#"build_timeout = "forever""#);
    assert!(result.is_err());
  }

  #[test]
  #[serial]
  fn missing_file_yields_defaults() {
    let temp = TempDir::new().unwrap();
    temp_env::with_var("COURSEPRESS_ROOT", Some(temp.path().to_str().unwrap()), || {
      let settings = Settings::load(&temp.path().join("absent.toml")).unwrap();
      assert_eq!(settings.root, temp.path());
      assert_eq!(settings.keep_records, 10);
      assert!(matches!(settings.runner, RunnerSettings::Local));
    });
  }

  #[test]
  #[serial]
  fn duplicate_course_keys_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("settings.toml");
    std::fs::write(&path, "[[courses]]\nkey = \"c1\"\n[[courses]]\nkey = \"c1\"\n").unwrap();
    temp_env::with_var("COURSEPRESS_ROOT", None::<&str>, || {
      let result = Settings::load(&path);
      assert!(matches!(result, Err(SettingsError::DuplicateCourse(k)) if k == "c1"));
    });
  }

  #[test]
  fn course_publish_mode_overrides_global() {
    let mut settings = Settings::with_root("/tmp/x");
    settings.courses.push(CourseSettings {
      key: "c1".to_string(),
      course_id: None,
      source: None,
      publish_mode: Some(PublishMode::Deferred),
    });
    assert_eq!(settings.publish_mode_for("c1"), PublishMode::Deferred);
    assert_eq!(settings.publish_mode_for("c2"), PublishMode::Immediate);
  }
}
