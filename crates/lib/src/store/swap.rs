//! Directory replacement primitives.

use std::fs;
use std::io;
use std::path::Path;

/// Atomically exchange two existing directory entries.
#[cfg(target_os = "linux")]
fn exchange(a: &Path, b: &Path) -> io::Result<()> {
  use rustix::fs::{CWD, RenameFlags, renameat_with};

  renameat_with(CWD, a, CWD, b, RenameFlags::EXCHANGE).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(target_os = "linux"))]
fn exchange(_a: &Path, _b: &Path) -> io::Result<()> {
  Err(io::Error::from(io::ErrorKind::Unsupported))
}

fn exchange_unsupported(err: &io::Error) -> bool {
  if err.kind() == io::ErrorKind::Unsupported {
    return true;
  }
  #[cfg(target_os = "linux")]
  {
    use rustix::io::Errno;
    let raw = err.raw_os_error();
    raw == Some(Errno::INVAL.raw_os_error()) || raw == Some(Errno::NOSYS.raw_os_error())
  }
  #[cfg(not(target_os = "linux"))]
  false
}

/// Make `incoming` visible at `live`, moving any previous tree to `outgoing`.
///
/// With exchange support, `live` names a complete tree at every instant.
/// Otherwise two renames are used and `live` is briefly absent, never partial.
/// Returns whether a previous tree was moved to `outgoing`.
pub fn replace_dir(incoming: &Path, live: &Path, outgoing: &Path) -> io::Result<bool> {
  if fs::symlink_metadata(live).is_err() {
    fs::rename(incoming, live)?;
    return Ok(false);
  }

  match exchange(incoming, live) {
    Ok(()) => {
      fs::rename(incoming, outgoing)?;
      Ok(true)
    }
    Err(e) if exchange_unsupported(&e) => {
      fs::rename(live, outgoing)?;
      fs::rename(incoming, live)?;
      Ok(true)
    }
    Err(e) => Err(e),
  }
}
