//! Deciding what to run for a build.

use std::collections::BTreeMap;

use crate::config::AppsMeta;
use crate::consts::APPS_META;
use crate::settings::Settings;
use crate::types::CourseKey;

use super::log::BuildLog;

/// Image and command for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
  /// Empty means the course needs no build step.
  pub image: String,
  /// `None` runs the image's own default command.
  pub command: Option<String>,
}

impl BuildPlan {
  /// Resolve the plan from, in order: explicit overrides, the course's
  /// `apps.meta`, service defaults.
  ///
  /// An image override also replaces the command, even with none. The default
  /// command applies only when `apps.meta` exists but names neither an image
  /// nor a command; a course image brings its own default command.
  pub fn resolve(
    image_override: Option<&str>,
    command_override: Option<&str>,
    meta: Option<&AppsMeta>,
    settings: &Settings,
    log: &mut BuildLog,
  ) -> Self {
    if let Some(image) = image_override {
      log.note(format!(
        "Build image and command overridden: {image}, {}",
        command_override.unwrap_or("<image default>")
      ));
      return Self {
        image: image.trim().to_string(),
        command: command_override.map(str::to_string),
      };
    }

    let Some(meta) = meta.filter(|m| !m.is_empty()) else {
      log.note(format!(
        "No {APPS_META} file, using the default build image: {}",
        settings.default_image
      ));
      return Self {
        image: settings.default_image.trim().to_string(),
        command: command_override.map(str::to_string),
      };
    };

    let image = match meta.get("build_image") {
      Some(image) => {
        log.note(format!("Using build image: {image}"));
        image.to_string()
      }
      None => {
        log.note(format!(
          "No build_image in {APPS_META}, using the default: {}",
          settings.default_image
        ));
        settings.default_image.clone()
      }
    };

    let command = if let Some(command) = meta.get("build_command") {
      log.note(format!("Using build command: {command}"));
      Some(command.to_string())
    } else if let Some(command) = command_override {
      log.note(format!("Build command overridden: {command}"));
      Some(command.to_string())
    } else if !meta.contains("build_image") && settings.default_command.is_some() {
      let command = settings.default_command.clone();
      log.note(format!(
        "No build_command in {APPS_META}, using the default: {}",
        command.as_deref().unwrap_or_default()
      ));
      command
    } else {
      log.note(format!("No build_command in {APPS_META} or settings, using the image default"));
      None
    };

    Self {
      image: image.trim().to_string(),
      command,
    }
  }

  pub fn needs_build(&self) -> bool {
    !self.image.is_empty()
  }
}

/// Variables every build sees.
pub fn build_env(settings: &Settings, course_key: &CourseKey) -> BTreeMap<String, String> {
  let course_id = settings
    .course(course_key.as_str())
    .and_then(|c| c.course_id)
    .map(|id| id.to_string())
    .unwrap_or_default();
  BTreeMap::from([
    ("COURSE_KEY".to_string(), course_key.to_string()),
    ("COURSE_ID".to_string(), course_id),
    ("STATIC_URL_PATH".to_string(), settings.static_url_path(course_key.as_str())),
    (
      "STATIC_CONTENT_HOST".to_string(),
      settings.static_content_host(course_key.as_str()),
    ),
  ])
}
