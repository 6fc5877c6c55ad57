//! Centralized constants for the dataplane operator.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod images;
pub mod labels;
pub mod network;
pub mod paths;
pub mod state;
