//! Locating, reading and preprocessing JSON/YAML configuration files.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use super::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Json,
  Yaml,
}

impl Format {
  /// Suffixes tried when a config is referenced without one.
  const SUFFIXES: &'static [(&'static str, Format)] = &[
    ("json", Format::Json),
    ("yaml", Format::Yaml),
    ("yml", Format::Yaml),
  ];

  pub fn from_path(path: &Path) -> Option<Self> {
    let ext = path.extension()?.to_str()?;
    Self::SUFFIXES.iter().find(|(s, _)| *s == ext).map(|(_, f)| *f)
  }
}

/// Find the config file for `path`, which may omit its suffix.
///
/// Two files differing only by suffix are rivals and rejected.
pub fn resolve_config(path: &Path) -> Result<PathBuf, ConfigError> {
  if path.is_file() && Format::from_path(path).is_some() {
    return Ok(path.to_path_buf());
  }

  let mut found = Vec::new();
  for (suffix, _) in Format::SUFFIXES {
    let mut candidate = path.as_os_str().to_owned();
    candidate.push(".");
    candidate.push(suffix);
    let candidate = PathBuf::from(candidate);
    if candidate.is_file() {
      found.push(candidate);
    }
  }

  match found.len() {
    0 => Err(ConfigError::NotFound { path: path.to_path_buf() }),
    1 => Ok(found.remove(0)),
    _ => Err(ConfigError::RivalConfigs {
      path: path.to_path_buf(),
      files: found,
    }),
  }
}

pub fn parse_str(format: Format, text: &str, path: &Path) -> Result<Value, ConfigError> {
  match format {
    Format::Json => serde_json::from_str(text).map_err(|source| ConfigError::Json {
      path: path.to_path_buf(),
      source,
    }),
    Format::Yaml => serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
      path: path.to_path_buf(),
      source,
    }),
  }
}

fn read(path: &Path) -> Result<String, ConfigError> {
  fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })
}

pub fn parse_file(path: &Path) -> Result<Value, ConfigError> {
  let format = Format::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat { path: path.to_path_buf() })?;
  parse_str(format, &read(path)?, path)
}

/// Parse a file whose top level must be a mapping.
pub fn parse_mapping(path: &Path) -> Result<Map<String, Value>, ConfigError> {
  match parse_file(path)? {
    Value::Object(map) => Ok(map),
    _ => Err(ConfigError::NotAMapping { path: path.to_path_buf() }),
  }
}

/// Merge the files listed under `include` into `data`.
///
/// Each entry is `{file, force?, template_context?}`. Without `force`, a key
/// already present is a [`ConfigError::DuplicateKey`]; with it, the included
/// value wins.
pub fn apply_includes(
  data: Map<String, Value>,
  target_file: &Path,
  course_dir: &Path,
) -> Result<Map<String, Value>, ConfigError> {
  let Some(entries) = data.get("include") else {
    return Ok(data);
  };
  let invalid = |reason: String| ConfigError::InvalidInclude {
    file: target_file.to_path_buf(),
    reason,
  };
  let entries = entries
    .as_array()
    .ok_or_else(|| invalid("\"include\" must be a list of mappings".to_string()))?
    .clone();

  let mut merged = data;
  for entry in entries {
    let entry = entry
      .as_object()
      .ok_or_else(|| invalid("every include entry must be a mapping".to_string()))?;
    let file = entry
      .get("file")
      .and_then(Value::as_str)
      .ok_or_else(|| ConfigError::MissingField {
        field: "file".to_string(),
        file: target_file.to_path_buf(),
      })?;
    let force = entry.get("force").and_then(Value::as_bool).unwrap_or(false);

    let include_file = resolve_config(&course_dir.join(file.trim_start_matches('/')))?;
    let format = Format::from_path(&include_file).ok_or_else(|| ConfigError::UnsupportedFormat {
      path: include_file.clone(),
    })?;
    let mut text = read(&include_file)?;
    if let Some(context) = entry.get("template_context") {
      let context = context
        .as_object()
        .ok_or_else(|| invalid("template_context must be a mapping".to_string()))?;
      text = render_template(&text, context);
    }

    let included = match parse_str(format, &text, &include_file)? {
      Value::Object(map) if !map.is_empty() => map,
      Value::Object(_) | Value::Null => {
        return Err(ConfigError::EmptyInclude {
          target_file: target_file.to_path_buf(),
          include_file,
        });
      }
      _ => return Err(ConfigError::NotAMapping { path: include_file }),
    };

    for (key, value) in included {
      if !force && merged.contains_key(&key) {
        return Err(ConfigError::DuplicateKey {
          key,
          target_file: target_file.to_path_buf(),
          include_file: include_file.clone(),
        });
      }
      merged.insert(key, value);
    }
    debug!(target = %target_file.display(), include = %include_file.display(), force, "included config");
  }

  Ok(merged)
}

/// Substitute `{{ name }}` and `{{ a.b }}` placeholders from `context`.
///
/// Unknown names render as the empty string.
pub fn render_template(text: &str, context: &Map<String, Value>) -> String {
  let mut out = String::with_capacity(text.len());
  let mut rest = text;
  while let Some(start) = rest.find("{{") {
    let Some(len) = rest[start + 2..].find("}}") else {
      break;
    };
    out.push_str(&rest[..start]);
    let name = rest[start + 2..start + 2 + len].trim();
    out.push_str(&lookup(context, name));
    rest = &rest[start + 2 + len + 2..];
  }
  out.push_str(rest);
  out
}

fn lookup(context: &Map<String, Value>, name: &str) -> String {
  let mut parts = name.split('.');
  let mut current = parts.next().and_then(|first| context.get(first));
  for part in parts {
    current = current.and_then(|v| match v {
      Value::Object(map) => map.get(part),
      Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
      _ => None,
    });
  }
  match current {
    None | Some(Value::Null) => String::new(),
    Some(Value::String(s)) => s.clone(),
    Some(other) => other.to_string(),
  }
}

/// Resolve `key|tag` processor suffixes and split the data per language.
///
/// `key|i18n` values are mappings from language to value; the result holds one
/// version of `data` for the default language and one for every other
/// language seen in an `|i18n` mapping. `key|rst` marks reStructuredText; the
/// text is kept as written.
pub fn process_tags(data: &Value, default_lang: &str) -> Result<BTreeMap<String, Value>, ConfigError> {
  let mut langs = BTreeSet::new();
  let default = process_node(data, default_lang, &mut langs)?;

  let mut versions = BTreeMap::new();
  for lang in langs.iter().filter(|l| *l != default_lang) {
    versions.insert(lang.clone(), process_node(data, lang, &mut BTreeSet::new())?);
  }
  versions.insert(default_lang.to_string(), default);
  Ok(versions)
}

fn split_tag(key: &str) -> Option<(&str, &str)> {
  let (base, tag) = key.rsplit_once('|')?;
  let word = !tag.is_empty() && tag.chars().all(|c| c.is_alphanumeric() || c == '_');
  (word && !base.is_empty()).then_some((base, tag))
}

fn process_node(node: &Value, lang: &str, langs: &mut BTreeSet<String>) -> Result<Value, ConfigError> {
  match node {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort_by(|a, b| (a.len(), a.as_str()).cmp(&(b.len(), b.as_str())));

      let mut out = Map::new();
      for raw_key in keys {
        let mut key = raw_key.as_str();
        let mut value = map[raw_key].clone();
        while let Some((base, tag)) = split_tag(key) {
          value = match tag {
            "i18n" => match value {
              Value::Object(per_lang) => {
                langs.extend(per_lang.keys().cloned());
                per_lang.get(lang).cloned().unwrap_or(Value::Null)
              }
              other => other,
            },
            "rst" => value,
            other => return Err(ConfigError::UnsupportedTag { tag: other.to_string() }),
          };
          key = base;
        }
        out.insert(key.to_string(), process_node(&value, lang, langs)?);
      }
      Ok(Value::Object(out))
    }
    Value::Array(items) => items
      .iter()
      .map(|item| process_node(item, lang, langs))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    other => Ok(other.clone()),
  }
}
