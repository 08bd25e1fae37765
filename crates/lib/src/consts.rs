//! Names shared across the crate.

pub const APP_NAME: &str = "coursepress";

/// Top-level directories under the data root.
pub const STAGING_DIR: &str = "staging";
pub const STORE_DIR: &str = "store";
pub const PUBLISH_DIR: &str = "publish";
pub const STATE_DIR: &str = "state";
/// Checkouts kept by an outside fetch collaborator, one per course.
pub const DEPOSIT_DIR: &str = "deposit";

/// Previous live trees kept for rollback, inside the publish directory.
pub const RETIRED_DIR: &str = ".retired";

/// Metadata file written inside every stored and published course tree.
pub const META_FILENAME: &str = ".coursepress.json";

/// Prefix of in-progress store entries. Never treated as a valid course tree.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Course-level build metadata (`key = value` lines) read from the source tree.
pub const APPS_META: &str = "apps.meta";

/// Index file name (without suffix) of a course configuration.
pub const INDEX: &str = "index";

/// Directories never copied from a built tree into the store.
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];
