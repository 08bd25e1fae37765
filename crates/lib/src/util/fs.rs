//! Filesystem helpers for course trees.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum TreeError {
  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to copy {path}: {source}")]
  Copy {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("symlink {link} points to absolute path {target}")]
  AbsoluteLink { link: PathBuf, target: PathBuf },

  #[error("symlink {link} points outside the course tree ({target})")]
  EscapingLink { link: PathBuf, target: PathBuf },
}

/// Recursively copy `src` into `dst`, skipping entries named in `exclude`.
///
/// Symlinks are recreated as symlinks rather than followed.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[&str]) -> Result<u64, TreeError> {
  let mut copied = 0;
  let walker = WalkDir::new(src).sort_by_file_name().into_iter().filter_entry(|e| {
    e.depth() == 0 || e.file_name().to_str().map(|n| !exclude.contains(&n)).unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|source| TreeError::Walk {
      path: src.to_path_buf(),
      source,
    })?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dst.join(rel);
    let copy_err = |source| TreeError::Copy {
      path: entry.path().to_path_buf(),
      source,
    };

    let file_type = entry.file_type();
    if file_type.is_dir() {
      fs::create_dir_all(&target).map_err(copy_err)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path()).map_err(copy_err)?;
      symlink(&link, &target).map_err(copy_err)?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target).map_err(copy_err)?;
      copied += 1;
    }
  }

  Ok(copied)
}

/// Remove a directory tree, treating a missing path as success.
pub fn remove_tree(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Reject trees containing symlinks that are absolute or lead outside `root`.
///
/// A built tree is moved between directories, so any link that depends on
/// where the tree lives would break after promotion.
pub fn check_self_contained(root: &Path) -> Result<(), TreeError> {
  for entry in WalkDir::new(root) {
    let entry = entry.map_err(|source| TreeError::Walk {
      path: root.to_path_buf(),
      source,
    })?;
    if !entry.path_is_symlink() {
      continue;
    }

    let link = entry.path().to_path_buf();
    let target = fs::read_link(&link).map_err(|source| TreeError::Copy {
      path: link.clone(),
      source,
    })?;
    if target.is_absolute() {
      return Err(TreeError::AbsoluteLink { link, target });
    }

    let rel_parent = link
      .parent()
      .and_then(|p| p.strip_prefix(root).ok())
      .unwrap_or(Path::new(""));
    if normalize_within(&rel_parent.join(&target)).is_none() {
      return Err(TreeError::EscapingLink { link, target });
    }
  }
  Ok(())
}

/// Lexically normalize a relative path; `None` if it climbs above its base.
pub fn normalize_within(path: &Path) -> Option<PathBuf> {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::Normal(part) => out.push(part),
      Component::CurDir => {}
      Component::ParentDir => {
        if !out.pop() {
          return None;
        }
      }
      Component::RootDir | Component::Prefix(_) => return None,
    }
  }
  Some(out)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}
