//! coursepress-lib: building, versioning and publishing course material
//!
//! A course goes through a pipeline owned by the [`orchestrator`]:
//! - `fetch`: the course sources are copied into staging
//! - `runner`: the course's build command turns sources into a built tree
//! - `config`: the built tree's course and exercise configuration is validated
//! - `grader`: exercise configuration is STOREd on, then PUBLISHed to, graders
//! - `store`: the tree moves atomically from staging to store to publish
//!
//! State shared between processes (locks, build records, store metadata)
//! lives on disk under the data root.

pub mod config;
pub mod consts;
pub mod fetch;
pub mod gc;
pub mod grader;
pub mod lock;
pub mod orchestrator;
pub mod platform;
pub mod record;
pub mod runner;
pub mod settings;
pub mod store;
pub mod types;
pub mod util;
