//! Neutrality inference over recorded experiment logs.
//!
//! This module estimates per-class congestion probabilities for links and
//! link sequences, classifies them as neutral or non-neutral, reduces the
//! non-neutral sequences to a minimal report, and writes the results.

pub mod cache;
pub mod classifier;
pub mod congestion;
pub mod pipeline;
pub mod reducer;
pub mod report;
pub mod stats;
pub mod topology;
pub mod types;

pub use types::*;
pub use classifier::{NeutralityClassifier, Strategy};
pub use congestion::{CongestionEstimator, SequenceEstimate};
pub use pipeline::{run_analysis, write_reports, AnalysisInput};
pub use reducer::{reduce, ReductionDecision};
pub use report::{generate_json_report, generate_text_report, AnalysisReport};
pub use topology::{PathSpec, Topology, TopologyError};
