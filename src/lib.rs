//! # neutralsim - Network neutrality inference for emulated experiments
//!
//! This library records per-interval packet forwarding on every link and path
//! of an emulated network, persists the recording in a compact binary format,
//! and infers from end-to-end path data alone which links treat traffic
//! classes differently.
//!
//! ## Overview
//!
//! During an experiment, every forwarded or dropped packet is charged to the
//! time intervals it was in flight, on its link, its path and the
//! (link, path) pair. After the experiment, congestion probabilities are
//! estimated per traffic class, compared across classes, and the links and
//! link sequences whose classes differ are reported as non-neutral.
//!
//! ## Key Features
//!
//! - **Interval-indexed store**: fixed-size time buckets with a global accumulator
//! - **Versioned binary format**: varint counters and packed per-packet event bits
//! - **Subsampling**: paths are compared at equal packet counts
//! - **Global clustering**: repeated 1-D k-means over pooled class gaps
//! - **Minimal report**: sequences explained by smaller ones are dropped
//! - **Validation**: confusion matrices, granularity and coverage against ground truth
//!
//! ## Architecture
//!
//! - `measurement`: LinkMeasurement, IntervalSnapshot, ExperimentLog and their encoding
//! - `analysis`: topology input, congestion estimation, classification,
//!   reduction, caching and reports
//! - `config`: analysis configuration and CLI overrides
//! - `utils`: duration parsing and formatting
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use neutralsim::analysis::{run_analysis, write_reports, AnalysisInput};
//! use neutralsim::config::load_config;
//!
//! let config = load_config(Path::new("analysis.yaml"))?;
//! let input = AnalysisInput::load(Path::new("run.bin"), Path::new("topology.yaml"), &config)?;
//! let report = run_analysis(&input, &config, None)?;
//! write_reports(&report, Path::new("analysis_output"), &input.output_stem())?;
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! estimator:
//!   loss_threshold: 0.01
//!   warmup: 10s
//!   cooldown: 10s
//!   resample_period: 5s
//!   sampling_iterations: 5
//! classifier:
//!   gap_threshold: 0.333
//!   sequence_strategy: global_clustering
//! ```
//!
//! ## Error Handling
//!
//! The measurement and analysis modules return typed `thiserror` errors.
//! Orchestration and the binary use `color_eyre` for reports with context.

pub mod analysis;
pub mod config;
pub mod measurement;
pub mod utils;
