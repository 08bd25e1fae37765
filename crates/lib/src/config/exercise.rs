//! Per-exercise configuration files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::ConfigError;
use super::parser::{apply_includes, parse_mapping, process_tags, resolve_config};
use super::types::Localized;

/// A parsed exercise config file, one data version per language.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseConfig {
  pub key: String,
  pub file: PathBuf,
  pub default_lang: String,
  pub data: BTreeMap<String, Value>,
}

/// Where derived model answer and template URLs point.
#[derive(Debug, Clone, Copy)]
pub struct ContentUrls<'a> {
  pub base: &'a str,
  pub course_key: &'a str,
}

impl ContentUrls<'_> {
  /// `<base>/<kind>/<course>/<exercise>/<file name>`
  pub fn file_url(&self, kind: &str, exercise_key: &str, path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    format!(
      "{}/{}/{}/{}/{}",
      self.base.trim_end_matches('/'),
      kind,
      self.course_key,
      exercise_key,
      name
    )
  }
}

impl ExerciseConfig {
  /// Load the config of `key` from `reference`.
  ///
  /// A relative reference is resolved against `conf_dir`, an absolute one
  /// against `course_dir`. Includes resolve against the same directory.
  pub fn load(
    key: &str,
    reference: &Path,
    course_dir: &Path,
    conf_dir: &Path,
    default_lang: &str,
  ) -> Result<Self, ConfigError> {
    let (base_dir, relative) = match reference.strip_prefix("/") {
      Ok(stripped) => (course_dir, stripped),
      Err(_) => (conf_dir, reference),
    };
    let file = resolve_config(&base_dir.join(relative))?;
    let data = parse_mapping(&file)?;
    let data = apply_includes(data, &file, base_dir)?;

    let mut versions = process_tags(&Value::Object(data), default_lang)?;
    for version in versions.values_mut() {
      let Value::Object(map) = version else {
        return Err(ConfigError::NotAMapping { path: file.clone() });
      };
      for field in ["title", "view_type"] {
        if !map.contains_key(field) {
          return Err(ConfigError::MissingField {
            field: field.to_string(),
            file: file.clone(),
          });
        }
      }
      map.insert("key".to_string(), Value::String(key.to_string()));
    }

    debug!(key, file = %file.display(), languages = versions.len(), "loaded exercise config");
    Ok(Self {
      key: key.to_string(),
      file,
      default_lang: default_lang.to_string(),
      data: versions,
    })
  }

  /// Languages with data, default language first.
  pub fn languages(&self) -> Vec<&str> {
    let mut langs: Vec<&str> = Vec::with_capacity(self.data.len());
    if self.data.contains_key(&self.default_lang) {
      langs.push(&self.default_lang);
    }
    langs.extend(self.data.keys().map(String::as_str).filter(|l| *l != self.default_lang));
    langs
  }

  /// Data for `lang`, else the default language, else any language.
  pub fn data_for_language(&self, lang: Option<&str>) -> Option<&Value> {
    lang
      .and_then(|l| self.data.get(l))
      .or_else(|| self.data.get(&self.default_lang))
      .or_else(|| self.data.values().next())
  }

  pub fn model_answer(&self, index_value: Option<&Localized<String>>, urls: ContentUrls<'_>) -> Option<Localized<String>> {
    self.resolve_link("model_answer", "model_files", "model", index_value, urls)
  }

  pub fn exercise_template(
    &self,
    index_value: Option<&Localized<String>>,
    urls: ContentUrls<'_>,
  ) -> Option<Localized<String>> {
    self.resolve_link("exercise_template", "template_files", "template", index_value, urls)
  }

  /// First non-empty of: the config file's own `field`, URLs derived from
  /// `files_field`, the index value.
  fn resolve_link(
    &self,
    field: &str,
    files_field: &str,
    kind: &str,
    index_value: Option<&Localized<String>>,
    urls: ContentUrls<'_>,
  ) -> Option<Localized<String>> {
    let langs = self.languages();

    let explicit: Vec<(&str, String)> = langs
      .iter()
      .filter_map(|lang| {
        let value = self.data.get(*lang)?.get(field)?.as_str()?;
        Some((*lang, value.to_string()))
      })
      .collect();
    if explicit.iter().any(|(_, v)| !v.is_empty()) {
      return Some(localize(explicit));
    }

    let files_for = |lang: &str| -> Vec<String> {
      self
        .data
        .get(lang)
        .and_then(|d| d.get(files_field))
        .and_then(Value::as_array)
        .map(|files| files.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
    };
    let join = |files: Vec<String>, lang: Option<&str>| -> String {
      files
        .iter()
        .map(|f| {
          let url = urls.file_url(kind, &self.key, f);
          match lang {
            Some(lang) => format!("{url}?lang={lang}"),
            None => url,
          }
        })
        .collect::<Vec<_>>()
        .join(" ")
    };
    if langs.iter().any(|l| !files_for(*l).is_empty()) {
      return Some(if langs.len() == 1 {
        Localized::Single(join(files_for(langs[0]), None))
      } else {
        Localized::PerLang(
          langs
            .iter()
            .map(|l| (l.to_string(), join(files_for(*l), Some(*l))))
            .collect(),
        )
      });
    }

    index_value.filter(|v| !v.is_empty()).cloned()
  }
}

/// Collapse per-language values that agree into a single value.
fn localize(values: Vec<(&str, String)>) -> Localized<String> {
  let first = values.first().map(|(_, v)| v.clone()).unwrap_or_default();
  if values.iter().all(|(_, v)| *v == first) {
    Localized::Single(first)
  } else {
    Localized::PerLang(values.into_iter().map(|(l, v)| (l.to_string(), v)).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  const URLS: ContentUrls<'static> = ContentUrls {
    base: "https://grader.example/",
    course_key: "c1",
  };

  fn load(content: &str) -> ExerciseConfig {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("exercises")).unwrap();
    fs::write(temp.path().join("exercises/q1.yaml"), content).unwrap();
    ExerciseConfig::load("q1", Path::new("exercises/q1"), temp.path(), temp.path(), "en").unwrap()
  }

  #[test]
  fn requires_title_and_view_type() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("q1.yaml"), "title: Q\n").unwrap();
    let result = ExerciseConfig::load("q1", Path::new("q1"), temp.path(), temp.path(), "en");
    assert!(matches!(result, Err(ConfigError::MissingField { ref field, .. }) if field == "view_type"));
  }

  #[test]
  fn absolute_reference_is_course_relative() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("grader")).unwrap();
    fs::write(temp.path().join("shared.yaml"), "title: Q\nview_type: v\n").unwrap();
    let config = ExerciseConfig::load("q1", Path::new("/shared"), temp.path(), &temp.path().join("grader"), "en").unwrap();
    assert_eq!(config.data["en"]["key"], "q1");
  }

  #[test]
  fn explicit_model_answer_wins_over_files() {
    let config = load("title: Q\nview_type: v\nmodel_answer: A\nmodel_files: [model/B.py]\n");
    let index = Localized::Single("C".to_string());
    assert_eq!(
      config.model_answer(Some(&index), URLS),
      Some(Localized::Single("A".to_string()))
    );
  }

  #[test]
  fn model_files_derive_urls() {
    let config = load("title: Q\nview_type: v\nmodel_files: [model/B.py, model/util.py]\n");
    let index = Localized::Single("C".to_string());
    assert_eq!(
      config.model_answer(Some(&index), URLS),
      Some(Localized::Single(
        "https://grader.example/model/c1/q1/B.py https://grader.example/model/c1/q1/util.py".to_string()
      ))
    );
  }

  #[test]
  fn index_value_is_the_fallback() {
    let config = load("title: Q\nview_type: v\nmodel_answer: \"\"\n");
    let index = Localized::Single("C".to_string());
    assert_eq!(config.model_answer(Some(&index), URLS), Some(index.clone()));
    assert_eq!(config.exercise_template(None, URLS), None);
  }

  #[test]
  fn multi_language_urls_carry_lang() {
    let config = load("title|i18n: {en: Q, fi: K}\nview_type: v\ntemplate_files: [tpl/a.py]\n");
    assert_eq!(config.languages(), vec!["en", "fi"]);
    let Some(Localized::PerLang(map)) = config.exercise_template(None, URLS) else {
      panic!("expected per-language template");
    };
    assert_eq!(map["en"], "https://grader.example/template/c1/q1/a.py?lang=en");
    assert_eq!(map["fi"], "https://grader.example/template/c1/q1/a.py?lang=fi");
  }

  #[test]
  fn data_for_language_falls_back() {
    let config = load("title|i18n: {en: Q, fi: K}\nview_type: v\n");
    assert_eq!(config.data_for_language(Some("fi")).unwrap()["title"], "K");
    assert_eq!(config.data_for_language(Some("sv")).unwrap()["title"], "Q");
  }
}
