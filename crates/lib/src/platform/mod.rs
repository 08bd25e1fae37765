//! Host filesystem locations.

pub mod paths;
