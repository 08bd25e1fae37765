//! Build pipeline tests against real stores in temporary directories.

mod common;

mod build_tests;
mod publish_tests;
mod status_tests;
