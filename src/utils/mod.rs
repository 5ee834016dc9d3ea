//! Shared utilities: duration parsing and formatting.

pub mod duration;

pub use duration::{format_nanos, parse_duration_to_nanos};
