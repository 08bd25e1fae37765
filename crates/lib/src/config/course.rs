//! Course index: modules, learning objects and the loaded course config.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::ConfigError;
use super::dates::{CourseDate, DATE_FORMATS_HELP, DURATION_FORMAT_HELP, SimpleDuration, parse_date};
use super::exercise::{ContentUrls, ExerciseConfig};
use super::meta::AppsMeta;
use super::parser::{parse_mapping, resolve_config};
use super::types::{Configure, LearningObject, Localized, normalize_item};
use crate::consts::INDEX;
use crate::types::VersionId;

pub const DEFAULT_LANG: &str = "en";

const MODULE_DATE_FIELDS: &[&str] = &["open", "close", "read-open", "late_close"];
const MODULE_DURATION_FIELDS: &[&str] = &["duration", "late_duration"];
const COURSE_DATE_FIELDS: &[&str] = &[
  "archive_time",
  "start",
  "end",
  "enrollment_start",
  "enrollment_end",
  "lifesupport_time",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Module {
  pub name: Localized<String>,
  pub key: String,
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub order: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub introduction: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub open: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub close: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration: Option<SimpleDuration>,
  #[serde(rename = "read-open", default, skip_serializing_if = "Option::is_none")]
  pub read_open: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub points_to_pass: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub late_close: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub late_penalty: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub late_duration: Option<SimpleDuration>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub numerate_ignoring_modules: Option<bool>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<LearningObject>,
}

/// `lang` may be one language or a list whose first entry is the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Languages {
  One(String),
  Many(Vec<String>),
}

impl Default for Languages {
  fn default() -> Self {
    Languages::One(DEFAULT_LANG.to_string())
  }
}

impl Languages {
  pub fn default_lang(&self) -> &str {
    match self {
      Languages::One(lang) => lang,
      Languages::Many(langs) => langs.first().map(String::as_str).unwrap_or(DEFAULT_LANG),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
  pub name: String,
  pub modules: Vec<Module>,
  #[serde(default)]
  pub lang: Languages,
  #[serde(default)]
  pub categories: BTreeMap<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub archive_time: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assistants: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contact: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_numbering: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub course_description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub course_footer: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enrollment_audience: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enrollment_start: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enrollment_end: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub head_urls: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub index_mode: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lifesupport_time: Option<CourseDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub module_numbering: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub numerate_ignoring_modules: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub view_content_to: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub static_dir: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub configures: Vec<Configure>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub unprotected_paths: Vec<String>,
}

fn check_date_fields(map: &Map<String, Value>, location: &str, dates: &[&str], durations: &[&str]) -> Result<(), ConfigError> {
  let bad = |field: &str, value: &Value, expected: &'static str| ConfigError::DateFormat {
    location: location.to_string(),
    field: field.to_string(),
    value: value.to_string(),
    expected,
  };
  for &field in dates {
    match map.get(field) {
      None | Some(Value::Null) => {}
      Some(Value::String(s)) if parse_date(s).is_some() => {}
      Some(other) => return Err(bad(field, other, DATE_FORMATS_HELP)),
    }
  }
  for &field in durations {
    match map.get(field) {
      None | Some(Value::Null) => {}
      Some(Value::String(s)) if SimpleDuration::parse(s).is_some() => {}
      Some(other) => return Err(bad(field, other, DURATION_FORMAT_HELP)),
    }
  }
  Ok(())
}

impl Module {
  pub fn from_value(value: Value) -> Result<Self, ConfigError> {
    let Value::Object(map) = value else {
      return Err(ConfigError::Schema {
        location: "module".to_string(),
        message: "expected a mapping".to_string(),
      });
    };
    let key = map.get("key").and_then(Value::as_str).unwrap_or("?").to_string();
    let location = format!("module {key}");
    let map = normalize_item(map, &location)?;
    check_date_fields(&map, &location, MODULE_DATE_FIELDS, MODULE_DURATION_FIELDS)?;

    let module: Module = serde_json::from_value(Value::Object(map)).map_err(|e| ConfigError::Schema {
      location: location.clone(),
      message: e.to_string(),
    })?;
    if let Some(penalty) = module.late_penalty
      && !(0.0..=1.0).contains(&penalty)
    {
      return Err(ConfigError::Schema {
        location,
        message: format!("late_penalty must be within [0, 1], got {penalty}"),
      });
    }
    Ok(module)
  }
}

impl Course {
  /// Build and validate a course from its parsed index.
  ///
  /// Returns the course and any non-fatal warnings.
  pub fn from_map(mut map: Map<String, Value>) -> Result<(Self, Vec<String>), ConfigError> {
    check_date_fields(&map, "course", COURSE_DATE_FIELDS, &[])?;

    let raw_modules = match map.remove("modules") {
      Some(Value::Array(items)) => items,
      Some(_) => {
        return Err(ConfigError::Schema {
          location: "course".to_string(),
          message: "modules must be a list".to_string(),
        });
      }
      None => Vec::new(),
    };
    let modules = raw_modules
      .into_iter()
      .map(Module::from_value)
      .collect::<Result<Vec<_>, _>>()?;

    map.insert("modules".to_string(), Value::Array(Vec::new()));
    let mut course: Course = serde_json::from_value(Value::Object(map)).map_err(|e| ConfigError::Schema {
      location: "course".to_string(),
      message: e.to_string(),
    })?;
    course.modules = modules;

    let warnings = course.validate()?;
    Ok((course, warnings))
  }

  fn validate(&self) -> Result<Vec<String>, ConfigError> {
    let mut keys = BTreeSet::new();
    for module in &self.modules {
      if !keys.insert(module.key.as_str()) {
        return Err(ConfigError::Schema {
          location: "course".to_string(),
          message: format!("duplicate module key: {}", module.key),
        });
      }
    }

    for object in self.learning_objects() {
      let category = &object.base().category;
      if !self.categories.contains_key(category) {
        return Err(ConfigError::Schema {
          location: format!("learning object {}", object.key()),
          message: format!("category not found in categories: {category}"),
        });
      }
    }

    let mut warnings = Vec::new();
    for module in &self.modules {
      if let (Some(close), Some(end)) = (module.close, self.end)
        && close > end
      {
        warnings.push(format!("module {}: course ends before module closes", module.key));
      }
      if let Some(late_close) = module.late_close
        && let Some(close) = module.close.or(self.end)
        && late_close < close
      {
        warnings.push(format!("module {}: 'late_close' is before 'close'", module.key));
      }
    }
    Ok(warnings)
  }

  /// Every learning object of every module, depth first.
  pub fn learning_objects(&self) -> Vec<&LearningObject> {
    fn walk<'a>(objects: &'a [LearningObject], out: &mut Vec<&'a LearningObject>) {
      for object in objects {
        out.push(object);
        walk(object.children(), out);
      }
    }
    let mut out = Vec::new();
    for module in &self.modules {
      walk(&module.children, &mut out);
    }
    out
  }
}

/// A grader endpoint with everything to send it in one STORE call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureTarget {
  pub url: String,
  /// Archive name → path relative to the course root.
  pub files: BTreeMap<String, String>,
  pub exercise_keys: Vec<String>,
}

/// A fully parsed and validated course.
#[derive(Debug, Clone)]
pub struct CourseConfig {
  pub course_key: String,
  pub version_id: Option<VersionId>,
  pub dir: PathBuf,
  pub conf_dir: PathBuf,
  pub index_file: PathBuf,
  pub meta: AppsMeta,
  pub lang: String,
  pub course: Course,
  pub exercises: BTreeMap<String, ExerciseConfig>,
  /// Keys of exercises with a config file, in course order.
  pub exercise_keys: Vec<String>,
  pub warnings: Vec<String>,
}

impl CourseConfig {
  /// Parse and validate the course rooted at `dir`.
  ///
  /// The index and exercise configs are looked up in the directory named by
  /// `grader_config` in `apps.meta`, or in `dir` itself.
  pub fn load(dir: &Path, course_key: &str, version_id: Option<VersionId>) -> Result<Self, ConfigError> {
    let meta = AppsMeta::load(dir).map_err(|source| ConfigError::Read {
      path: dir.join(crate::consts::APPS_META),
      source,
    })?;
    let conf_dir = match meta.get("grader_config") {
      Some(sub) => dir.join(sub),
      None => dir.to_path_buf(),
    };

    let index_file = resolve_config(&conf_dir.join(INDEX))?;
    let (course, warnings) = Course::from_map(parse_mapping(&index_file)?)?;
    let lang = course.lang.default_lang().to_string();

    let mut exercises = BTreeMap::new();
    let mut exercise_keys = Vec::new();
    for object in course.learning_objects() {
      let Some(exercise) = object.as_exercise() else {
        continue;
      };
      let Some(reference) = &exercise.config else {
        continue;
      };
      let key = object.key().to_string();
      let config = ExerciseConfig::load(&key, reference, dir, &conf_dir, &lang)?;
      exercise_keys.push(key.clone());
      exercises.insert(key, config);
    }

    for warning in &warnings {
      info!(course_key, warning = %warning, "course config warning");
    }
    debug!(course_key, exercises = exercise_keys.len(), index = %index_file.display(), "loaded course config");

    Ok(Self {
      course_key: course_key.to_string(),
      version_id,
      dir: dir.to_path_buf(),
      conf_dir,
      index_file,
      meta,
      lang,
      course,
      exercises,
      exercise_keys,
      warnings,
    })
  }

  pub fn find_object(&self, key: &str) -> Option<&LearningObject> {
    self.course.learning_objects().into_iter().find(|o| o.key() == key)
  }

  /// Course-level `configures` plus exercise-level `configure`, grouped by URL
  /// in first-seen order.
  pub fn configure_targets(&self) -> Vec<ConfigureTarget> {
    let mut targets: Vec<ConfigureTarget> = self
      .course
      .configures
      .iter()
      .map(|c| ConfigureTarget {
        url: c.url.clone(),
        files: c.files.clone(),
        exercise_keys: Vec::new(),
      })
      .collect();

    for object in self.course.learning_objects() {
      let Some(configure) = object.as_exercise().and_then(|e| e.configure.as_ref()) else {
        continue;
      };
      let index = match targets.iter().position(|t| t.url == configure.url) {
        Some(index) => index,
        None => {
          targets.push(ConfigureTarget {
            url: configure.url.clone(),
            files: BTreeMap::new(),
            exercise_keys: Vec::new(),
          });
          targets.len() - 1
        }
      };
      let target = &mut targets[index];
      target.exercise_keys.push(object.key().to_string());
      target
        .files
        .extend(configure.files.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    targets
  }

  /// The course as sent to graders, without service-local fields.
  pub fn course_spec(&self) -> Value {
    let mut spec = serde_json::to_value(&self.course).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut spec {
      for local in ["static_dir", "configures", "unprotected_paths"] {
        map.remove(local);
      }
    }
    spec
  }

  /// An exercise's index entry as sent to graders, with `model_answer` and
  /// `exercise_template` resolved against its config file.
  pub fn exercise_spec(&self, key: &str, content_url: &str) -> Option<Value> {
    let object = self.find_object(key)?;
    let mut spec = serde_json::to_value(object).ok()?;
    let map = spec.as_object_mut()?;
    map.remove("config");
    map.remove("configure");
    map.remove("children");

    if let Some(config) = self.exercises.get(key) {
      let urls = ContentUrls {
        base: content_url,
        course_key: &self.course_key,
      };
      let base = object.base();
      for (field, value) in [
        ("model_answer", config.model_answer(base.model_answer.as_ref(), urls)),
        ("exercise_template", config.exercise_template(base.exercise_template.as_ref(), urls)),
      ] {
        match value.and_then(|v| serde_json::to_value(v).ok()) {
          Some(v) => map.insert(field.to_string(), v),
          None => map.remove(field),
        };
      }
    }
    Some(spec)
  }
}
