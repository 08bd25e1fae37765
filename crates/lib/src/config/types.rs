//! Learning objects: the closed set of items a course module is made of.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::ConfigError;

/// A value given either once or per language (`{en: .., fi: ..}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Localized<T> {
  PerLang(BTreeMap<String, T>),
  Single(T),
}

impl<T> Localized<T> {
  pub fn get(&self, lang: &str) -> Option<&T> {
    match self {
      Localized::Single(value) => Some(value),
      Localized::PerLang(map) => map.get(lang),
    }
  }

  pub fn values(&self) -> Vec<&T> {
    match self {
      Localized::Single(value) => vec![value],
      Localized::PerLang(map) => map.values().collect(),
    }
  }
}

impl Localized<String> {
  pub fn is_empty(&self) -> bool {
    self.values().iter().all(|v| v.is_empty())
  }
}

/// A grader endpoint and the files (archive name → course path) it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configure {
  pub url: String,
  #[serde(default)]
  pub files: BTreeMap<String, String>,
}

/// Fields shared by every learning object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBase {
  pub key: String,
  pub category: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub order: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub audience: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<Localized<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub use_wide_column: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<Localized<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model_answer: Option<Localized<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exercise_template: Option<Localized<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exercise_info: Option<Value>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<LearningObject>,
}

const BASE_FIELDS: &[&str] = &[
  "key",
  "category",
  "status",
  "order",
  "audience",
  "name",
  "description",
  "use_wide_column",
  "url",
  "model_answer",
  "exercise_template",
  "exercise_info",
  "children",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
  #[serde(flatten)]
  pub base: ItemBase,
  pub static_content: Localized<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub generate_table_of_contents: Option<bool>,
}

const CHAPTER_FIELDS: &[&str] = &["static_content", "generate_table_of_contents"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
  #[serde(flatten)]
  pub base: ItemBase,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_submissions: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub allow_assistant_viewing: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub allow_assistant_grading: Option<bool>,
  /// Exercise config file, relative to the config directory; an absolute
  /// path is relative to the course root.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub configure: Option<Configure>,
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confirm_the_level: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub difficulty: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_group_size: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_group_size: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_points: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub points_to_pass: Option<u32>,
}

const EXERCISE_FIELDS: &[&str] = &[
  "max_submissions",
  "allow_assistant_viewing",
  "allow_assistant_grading",
  "config",
  "configure",
  "type",
  "confirm_the_level",
  "difficulty",
  "min_group_size",
  "max_group_size",
  "max_points",
  "points_to_pass",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtiExercise {
  #[serde(flatten)]
  pub exercise: Exercise,
  pub lti: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lti_context_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lti_resource_link_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lti_aplus_get_and_post: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lti_open_in_iframe: Option<bool>,
}

const LTI_FIELDS: &[&str] = &[
  "lti",
  "lti_context_id",
  "lti_resource_link_id",
  "lti_aplus_get_and_post",
  "lti_open_in_iframe",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseCollection {
  #[serde(flatten)]
  pub base: ItemBase,
  pub target_category: String,
  pub target_url: String,
  pub max_points: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub points_to_pass: Option<u32>,
}

const COLLECTION_FIELDS: &[&str] = &["target_category", "target_url", "max_points", "points_to_pass"];

/// One node of a module's content tree.
///
/// The variant is chosen by its marker field: `static_content` makes a
/// chapter, `lti` an LTI exercise, `target_category` a collection; anything
/// else is a plain exercise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LearningObject {
  Chapter(Chapter),
  LtiExercise(LtiExercise),
  ExerciseCollection(ExerciseCollection),
  Exercise(Exercise),
}

impl LearningObject {
  pub fn base(&self) -> &ItemBase {
    match self {
      LearningObject::Chapter(c) => &c.base,
      LearningObject::LtiExercise(l) => &l.exercise.base,
      LearningObject::ExerciseCollection(c) => &c.base,
      LearningObject::Exercise(e) => &e.base,
    }
  }

  pub fn key(&self) -> &str {
    &self.base().key
  }

  pub fn children(&self) -> &[LearningObject] {
    &self.base().children
  }

  /// The exercise part of plain and LTI exercises.
  pub fn as_exercise(&self) -> Option<&Exercise> {
    match self {
      LearningObject::Exercise(e) => Some(e),
      LearningObject::LtiExercise(l) => Some(&l.exercise),
      _ => None,
    }
  }

  pub fn from_value(value: Value) -> Result<Self, ConfigError> {
    let Value::Object(map) = value else {
      return Err(ConfigError::Schema {
        location: "learning object".to_string(),
        message: "expected a mapping".to_string(),
      });
    };
    let map = normalize_item(map, "learning object")?;
    let key = map.get("key").and_then(Value::as_str).unwrap_or("?").to_string();
    let location = format!("learning object {key}");

    let (allowed, object): (Vec<&[&str]>, Result<Self, serde_json::Error>) = if map.contains_key("static_content") {
      (
        vec![BASE_FIELDS, CHAPTER_FIELDS],
        serde_json::from_value(Value::Object(map.clone())).map(LearningObject::Chapter),
      )
    } else if map.contains_key("lti") {
      (
        vec![BASE_FIELDS, EXERCISE_FIELDS, LTI_FIELDS],
        serde_json::from_value(Value::Object(map.clone())).map(LearningObject::LtiExercise),
      )
    } else if map.contains_key("target_category") || map.contains_key("target_url") {
      (
        vec![BASE_FIELDS, COLLECTION_FIELDS],
        serde_json::from_value(Value::Object(map.clone())).map(LearningObject::ExerciseCollection),
      )
    } else {
      (
        vec![BASE_FIELDS, EXERCISE_FIELDS],
        serde_json::from_value(Value::Object(map.clone())).map(LearningObject::Exercise),
      )
    };

    if let Some(field) = map.keys().find(|k| !allowed.iter().any(|set| set.contains(&k.as_str()))) {
      return Err(ConfigError::Schema {
        location,
        message: format!("unknown field {field:?}"),
      });
    }

    let object = object.map_err(|e| ConfigError::Schema {
      location: location.clone(),
      message: e.to_string(),
    })?;
    object.validate(&location)?;
    Ok(object)
  }

  fn validate(&self, location: &str) -> Result<(), ConfigError> {
    let fail = |message: &str| {
      Err(ConfigError::Schema {
        location: location.to_string(),
        message: message.to_string(),
      })
    };
    match self {
      LearningObject::Chapter(chapter) => {
        if chapter.static_content.values().iter().any(|p| p.is_absolute()) {
          return fail("static_content path must be relative");
        }
      }
      LearningObject::ExerciseCollection(collection) => {
        if collection.max_points == 0 {
          return fail("max_points must be positive");
        }
      }
      LearningObject::Exercise(_) | LearningObject::LtiExercise(_) => {}
    }
    if let Some(exercise) = self.as_exercise()
      && exercise.allow_assistant_grading == Some(true)
      && exercise.allow_assistant_viewing != Some(true)
    {
      return fail("assistant grading is allowed but viewing is not");
    }
    Ok(())
  }
}

impl<'de> Deserialize<'de> for LearningObject {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = Value::deserialize(deserializer)?;
    LearningObject::from_value(value).map_err(serde::de::Error::custom)
  }
}

/// Shared preprocessing of item and module mappings.
///
/// Drops private `_` keys and the legacy `scale_points`, and accepts `title`
/// as an alias of `name` (never both).
pub(crate) fn normalize_item(mut map: Map<String, Value>, location: &str) -> Result<Map<String, Value>, ConfigError> {
  map.retain(|k, _| !k.starts_with('_') && k != "scale_points");
  if let Some(title) = map.remove("title") {
    if map.contains_key("name") {
      return Err(ConfigError::Schema {
        location: location.to_string(),
        message: "only one of name and title should be specified".to_string(),
      });
    }
    map.insert("name".to_string(), title);
  }
  Ok(map)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn variant_follows_marker_field() {
    let chapter = LearningObject::from_value(json!({
      "key": "intro", "category": "chapter", "title": "Intro", "static_content": "intro/index.html",
    }))
    .unwrap();
    assert!(matches!(chapter, LearningObject::Chapter(_)));

    let lti = LearningObject::from_value(json!({"key": "l", "category": "lti", "lti": "service"})).unwrap();
    assert!(matches!(lti, LearningObject::LtiExercise(_)));
    assert!(lti.as_exercise().is_some());

    let collection = LearningObject::from_value(json!({
      "key": "c", "category": "x", "target_category": "x", "target_url": "https://a.example", "max_points": 5,
    }))
    .unwrap();
    assert!(matches!(collection, LearningObject::ExerciseCollection(_)));

    let exercise = LearningObject::from_value(json!({"key": "e", "category": "x", "max_points": 10})).unwrap();
    assert!(matches!(exercise, LearningObject::Exercise(_)));
  }

  #[test]
  fn title_becomes_name_and_private_keys_drop() {
    let object = LearningObject::from_value(json!({
      "key": "e", "category": "x", "title": {"en": "Hi", "fi": "Moi"}, "_note": 1, "scale_points": 3,
    }))
    .unwrap();
    assert_eq!(object.base().name.as_ref().unwrap().get("fi").unwrap(), "Moi");
  }

  #[test]
  fn name_and_title_are_exclusive() {
    let result = LearningObject::from_value(json!({"key": "e", "category": "x", "title": "a", "name": "b"}));
    assert!(matches!(result, Err(ConfigError::Schema { .. })));
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let result = LearningObject::from_value(json!({"key": "e", "category": "x", "max_pionts": 1}));
    assert!(matches!(result, Err(ConfigError::Schema { message, .. }) if message.contains("max_pionts")));
  }

  #[test]
  fn variant_rules() {
    let absolute = LearningObject::from_value(json!({"key": "c", "category": "x", "static_content": "/etc/passwd"}));
    assert!(absolute.is_err());

    let zero = LearningObject::from_value(json!({
      "key": "c", "category": "x", "target_category": "x", "target_url": "u", "max_points": 0,
    }));
    assert!(zero.is_err());

    let grading = LearningObject::from_value(json!({"key": "e", "category": "x", "allow_assistant_grading": true}));
    assert!(grading.is_err());
  }

  #[test]
  fn children_nest() {
    let chapter = LearningObject::from_value(json!({
      "key": "ch", "category": "chapter", "static_content": "ch.html",
      "children": [{"key": "q1", "category": "quiz", "config": "exercises/q1"}],
    }))
    .unwrap();
    assert_eq!(chapter.children()[0].key(), "q1");
    assert_eq!(
      chapter.children()[0].as_exercise().unwrap().config,
      Some(PathBuf::from("exercises/q1"))
    );
  }
}
