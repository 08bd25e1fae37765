//! Grader synchronization.
//!
//! Course and exercise configuration reaches grading services in two phases.
//! STORE uploads a version without activating it; PUBLISH activates it and is
//! refused by an endpoint whose stored version differs from the requested one.
//! This keeps graders and the local publish tree on the same version.

pub mod archive;
mod client;
mod local;
pub mod protocol;
mod transport;

pub use archive::{ArchiveError, build_archive};
pub use client::{GraderClient, without_explicit};
pub use local::{EndpointState, LocalGrader, StoredVersion};
pub use protocol::{
  EndpointReport, EndpointStatus, ExerciseData, GraderError, PublishReport, PublishRequest, StoreRequest,
};
pub use transport::{GraderTransport, HttpTransport};
