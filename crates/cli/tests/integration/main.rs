//! CLI integration tests: full build and publish cycles through the binary.

mod common;

mod build_tests;
mod gc_tests;
