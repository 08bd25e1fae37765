//! Build runners.
//!
//! A runner executes a course's build command against its staging tree and
//! reports the exit code plus the combined stdout/stderr. Which runner is used
//! is a service setting; see [`from_settings`].

mod container;
mod custom;
mod local;
mod process;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::settings::RunnerSettings;
use crate::types::{CourseKey, VersionId};

pub use container::ContainerRunner;
pub use custom::CustomRunner;
pub use local::LocalRunner;

#[derive(Debug, Error)]
pub enum RunnerError {
  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("build timed out after {}", humantime::format_duration(*after))]
  Timeout { after: Duration, log: String },

  #[error("invalid build command {command:?}: {reason}")]
  InvalidCommand { command: String, reason: &'static str },

  #[error("no path mapping covers {}", .0.display())]
  UnmappedPath(PathBuf),

  #[error("io error while running build: {0}")]
  Io(#[from] std::io::Error),
}

impl RunnerError {
  /// Output captured before the failure, if any.
  pub fn log(&self) -> &str {
    match self {
      RunnerError::Timeout { log, .. } => log,
      _ => "",
    }
  }
}

/// One build invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub course_key: CourseKey,
  pub version_id: VersionId,
  pub source_path: PathBuf,
  pub image: Option<String>,
  pub command: Option<String>,
  pub env: BTreeMap<String, String>,
  pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
  pub exit_code: Option<i32>,
  pub log: String,
}

impl RunOutput {
  pub fn success(&self) -> bool {
    self.exit_code == Some(0)
  }

  pub(crate) fn skipped(reason: &str) -> Self {
    Self {
      exit_code: Some(0),
      log: format!("{reason}\n"),
    }
  }
}

#[async_trait]
pub trait BuildRunner: Send + Sync {
  fn name(&self) -> &'static str;

  async fn run(&self, request: &BuildRequest) -> Result<RunOutput, RunnerError>;
}

/// The runner configured in settings.
pub fn from_settings(settings: &RunnerSettings) -> Arc<dyn BuildRunner> {
  match settings {
    RunnerSettings::Local => Arc::new(LocalRunner),
    RunnerSettings::Container {
      program,
      path_mappings,
      extra_args,
    } => Arc::new(ContainerRunner {
      program: program.clone(),
      path_mappings: path_mappings.clone(),
      extra_args: extra_args.clone(),
    }),
    RunnerSettings::Custom { program, args } => Arc::new(CustomRunner {
      program: program.clone(),
      args: args.clone(),
    }),
  }
}

/// Split a command line into words the way a POSIX shell would, minus
/// expansions: whitespace separates words, quotes group, backslash escapes.
pub fn split_command(command: &str) -> Result<Vec<String>, RunnerError> {
  let invalid = |reason| RunnerError::InvalidCommand {
    command: command.to_string(),
    reason,
  };

  let mut words = Vec::new();
  let mut word = String::new();
  let mut in_word = false;
  let mut chars = command.chars();

  while let Some(c) = chars.next() {
    match c {
      '\'' => {
        in_word = true;
        loop {
          match chars.next() {
            Some('\'') => break,
            Some(c) => word.push(c),
            None => return Err(invalid("unterminated single quote")),
          }
        }
      }
      '"' => {
        in_word = true;
        loop {
          match chars.next() {
            Some('"') => break,
            Some('\\') => match chars.next() {
              Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
              Some(c) => {
                word.push('\\');
                word.push(c);
              }
              None => return Err(invalid("unterminated double quote")),
            },
            Some(c) => word.push(c),
            None => return Err(invalid("unterminated double quote")),
          }
        }
      }
      '\\' => {
        in_word = true;
        match chars.next() {
          Some(c) => word.push(c),
          None => return Err(invalid("trailing backslash")),
        }
      }
      c if c.is_whitespace() => {
        if in_word {
          words.push(std::mem::take(&mut word));
          in_word = false;
        }
      }
      c => {
        in_word = true;
        word.push(c);
      }
    }
  }
  if in_word {
    words.push(word);
  }
  Ok(words)
}
