//! Course configuration: an index file plus per-exercise config files,
//! parsed into a validated tree of modules and learning objects.
//!
//! ```text
//! <course>/
//! ├── apps.meta            # build_image, build_command, grader_config
//! ├── index.yaml           # course, modules, learning objects
//! └── exercises/q1.yaml    # exercise config referenced by `config:`
//! ```

pub mod course;
pub mod dates;
pub mod exercise;
pub mod meta;
pub mod parser;
pub mod types;

use std::path::PathBuf;

use thiserror::Error;

pub use course::{ConfigureTarget, Course, CourseConfig, Module};
pub use exercise::{ContentUrls, ExerciseConfig};
pub use meta::AppsMeta;
pub use types::{Chapter, Configure, Exercise, ExerciseCollection, ItemBase, LearningObject, Localized, LtiExercise};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("no supported config at {path}")]
  NotFound { path: PathBuf },

  #[error("multiple config files for {path}: {files:?}")]
  RivalConfigs { path: PathBuf, files: Vec<PathBuf> },

  #[error("unsupported config format: {path}")]
  UnsupportedFormat { path: PathBuf },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid JSON in {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid YAML in {path}: {source}")]
  Yaml {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("{path} must contain a mapping")]
  NotAMapping { path: PathBuf },

  #[error("invalid include in {file}: {reason}")]
  InvalidInclude { file: PathBuf, reason: String },

  #[error("included config file {include_file} is empty (included from {target_file})")]
  EmptyInclude { target_file: PathBuf, include_file: PathBuf },

  #[error(
    "key {key:?} already exists in {target_file}; {include_file} cannot overwrite it unless the include sets force"
  )]
  DuplicateKey {
    key: String,
    target_file: PathBuf,
    include_file: PathBuf,
  },

  #[error("unsupported processor tag {tag:?}")]
  UnsupportedTag { tag: String },

  #[error("required field {field:?} missing from {file}")]
  MissingField { field: String, file: PathBuf },

  #[error("{location}: invalid {field} {value}, expected {expected}")]
  DateFormat {
    location: String,
    field: String,
    value: String,
    expected: &'static str,
  },

  #[error("{location}: {message}")]
  Schema { location: String, message: String },
}
