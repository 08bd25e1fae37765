//! Shared utilities.
//!
//! Tree hashing and the filesystem helpers used when moving course trees
//! between staging, store and publish.

pub mod fs;
pub mod hash;
