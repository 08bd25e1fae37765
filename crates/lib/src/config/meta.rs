//! `apps.meta`: course-level `key = value` settings in the source tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::consts::APPS_META;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppsMeta(BTreeMap<String, String>);

impl AppsMeta {
  /// Read `apps.meta` from `course_dir`. A missing file is an empty meta.
  pub fn load(course_dir: &Path) -> std::io::Result<Self> {
    match fs::read_to_string(course_dir.join(APPS_META)) {
      Ok(content) => Ok(Self::parse(&content)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
      Err(e) => Err(e),
    }
  }

  pub fn parse(content: &str) -> Self {
    let entries = content
      .lines()
      .filter_map(|line| line.split_once('='))
      .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
      .collect();
    Self(entries)
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}
