use tracing::{debug, info, warn};

use crate::types::{CourseKey, VersionId};

/// Human-readable log of one build, persisted in its record.
///
/// Pipeline notes are mirrored as tracing events tagged with the course and
/// version; raw runner output only at debug level.
#[derive(Debug, Clone)]
pub struct BuildLog {
  course_key: CourseKey,
  version_id: VersionId,
  text: String,
}

impl BuildLog {
  pub fn new(course_key: CourseKey, version_id: VersionId) -> Self {
    Self {
      course_key,
      version_id,
      text: String::new(),
    }
  }

  /// A pipeline step or decision.
  pub fn note(&mut self, message: impl AsRef<str>) {
    let message = message.as_ref();
    info!(course_key = %self.course_key, version_id = %self.version_id, "{message}");
    self.push_line(message);
  }

  pub fn warn(&mut self, message: impl AsRef<str>) {
    let message = message.as_ref();
    warn!(course_key = %self.course_key, version_id = %self.version_id, "{message}");
    self.push_line(&format!("WARNING: {message}"));
  }

  /// Output captured from the build command.
  pub fn output(&mut self, output: &str) {
    if output.is_empty() {
      return;
    }
    debug!(
      course_key = %self.course_key,
      version_id = %self.version_id,
      bytes = output.len(),
      "build output"
    );
    self.text.push_str(output);
    if !output.ends_with('\n') {
      self.text.push('\n');
    }
  }

  fn push_line(&mut self, line: &str) {
    self.text.push_str(line);
    self.text.push('\n');
  }

  pub fn as_str(&self) -> &str {
    &self.text
  }

  pub fn into_string(self) -> String {
    self.text
  }
}
