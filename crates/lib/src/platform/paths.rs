use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  let userprofile = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
  PathBuf::from(userprofile)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
  PathBuf::from(home)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  let appdata = std::env::var("APPDATA").map(PathBuf::from).unwrap_or_else(|_| home_dir());
  appdata.join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  let appdata = std::env::var("APPDATA").map(PathBuf::from).unwrap_or_else(|_| home_dir());
  appdata.join(APP_NAME)
}

/// Root of the staging/store/publish/state layout.
///
/// `COURSEPRESS_ROOT` overrides the default data directory.
pub fn root_dir() -> PathBuf {
  if let Ok(path) = std::env::var("COURSEPRESS_ROOT") {
    return PathBuf::from(path);
  }
  data_dir()
}

/// Settings file location. `COURSEPRESS_CONFIG` overrides the default.
pub fn settings_path() -> PathBuf {
  if let Ok(path) = std::env::var("COURSEPRESS_CONFIG") {
    return PathBuf::from(path);
  }
  config_dir().join("settings.toml")
}
