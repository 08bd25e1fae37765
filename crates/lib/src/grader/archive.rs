//! Packs the files a grader asked for into one uncompressed tar.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tar::{Builder, EntryType, Header};
use thiserror::Error;
use walkdir::WalkDir;

use crate::util::fs::normalize_within;
use crate::util::hash::hash_bytes;

/// Longest path that fits a ustar header (155 prefix + 100 name).
const USTAR_PATH_MAX: usize = 255;

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("archive path {path:?} for {name:?} leaves the course directory")]
  OutsideCourse { name: String, path: String },

  #[error("archive source {path} for {name:?} does not exist")]
  Missing { name: String, path: PathBuf },

  #[error("failed to archive {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

/// Tar `files` (archive name → path relative to `course_dir`).
///
/// Directories are added recursively under their archive name; symlinks are
/// stored as links. Names too long for a ustar header get a PAX `path` record.
pub fn build_archive(course_dir: &Path, files: &BTreeMap<String, String>) -> Result<Vec<u8>, ArchiveError> {
  let mut builder = Builder::new(Vec::new());
  builder.follow_symlinks(false);

  for (name, rel) in files {
    let normalized = normalize_within(Path::new(rel.trim_start_matches('/'))).ok_or_else(|| {
      ArchiveError::OutsideCourse {
        name: name.clone(),
        path: rel.clone(),
      }
    })?;
    let source = course_dir.join(normalized);
    if fs::symlink_metadata(&source).is_err() {
      return Err(ArchiveError::Missing {
        name: name.clone(),
        path: source,
      });
    }

    let name = name.trim_matches('/');
    for entry in WalkDir::new(&source).sort_by_file_name() {
      let entry = entry.map_err(|e| ArchiveError::Walk {
        path: source.clone(),
        source: e,
      })?;
      let suffix = entry.path().strip_prefix(&source).unwrap_or(Path::new(""));
      let entry_name = if suffix.as_os_str().is_empty() {
        name.to_string()
      } else {
        format!("{name}/{}", suffix.to_string_lossy())
      };
      append_entry(&mut builder, entry.path(), &entry_name)?;
    }
  }

  builder.into_inner().map_err(|source| ArchiveError::Io {
    path: course_dir.to_path_buf(),
    source,
  })
}

fn append_entry(builder: &mut Builder<Vec<u8>>, path: &Path, name: &str) -> Result<(), ArchiveError> {
  let io_err = |source| ArchiveError::Io {
    path: path.to_path_buf(),
    source,
  };
  let meta = fs::symlink_metadata(path).map_err(io_err)?;

  let mut header = Header::new_ustar();
  header.set_metadata(&meta);
  set_path(builder, &mut header, name).map_err(io_err)?;

  if meta.file_type().is_symlink() {
    let target = fs::read_link(path).map_err(io_err)?;
    header.set_entry_type(EntryType::Symlink);
    header.set_size(0);
    header.set_link_name(&target).map_err(io_err)?;
    header.set_cksum();
    builder.append(&header, io::empty()).map_err(io_err)
  } else if meta.is_dir() {
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_cksum();
    builder.append(&header, io::empty()).map_err(io_err)
  } else {
    let file = fs::File::open(path).map_err(io_err)?;
    header.set_entry_type(EntryType::Regular);
    header.set_cksum();
    builder.append(&header, file).map_err(io_err)
  }
}

fn set_path(builder: &mut Builder<Vec<u8>>, header: &mut Header, name: &str) -> io::Result<()> {
  if name.len() <= USTAR_PATH_MAX && name.is_ascii() && header.set_path(name).is_ok() {
    return Ok(());
  }
  builder.append_pax_extensions([("path", name.as_bytes())])?;
  let digest = hash_bytes(name.as_bytes());
  header.set_path(format!("PaxHeaders/{}", &digest.0[..32]))
}
