//! Command-line entry points.

pub mod analyze;
pub mod analyzers;
pub mod folders;
pub mod schema;
