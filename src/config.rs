//! Analysis configuration.
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields the standard analysis. Example:
//!
//! ```yaml
//! estimator:
//!   loss_threshold: 0.01
//!   warmup: 10s
//!   cooldown: 10s
//!   resample_period: 500ms
//!   sampling_iterations: 5
//! classifier:
//!   sequence_strategy: global_clustering
//!   fallback_to_gap_threshold: true
//! ```

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::analysis::classifier::Strategy;

/// Loss thresholds for path congestion probabilities, from 10% down to 0.0001%.
pub const DEFAULT_PATH_THRESHOLDS: [f64; 17] = [
    0.100, 0.050, 0.040, 0.030, 0.025, 0.020, 0.015, 0.010, 0.005, 0.0025, 0.0010, 0.0005,
    0.00025, 0.00020, 0.00015, 0.000010, 0.000001,
];

/// Top-level configuration structure that mirrors the YAML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub estimator: EstimatorConfig,
    pub classifier: ClassifierConfig,
    /// Loss thresholds for the path congestion table.
    pub path_thresholds: Vec<f64>,
}

/// Congestion estimation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EstimatorConfig {
    /// An interval is congested when its loss rate reaches this value
    pub loss_threshold: f64,
    /// Packets per interval per traffic-volume bin
    pub bin_size: f64,
    /// Intervals with fewer packets in flight are ignored
    pub min_packets: u64,
    /// Transient cut at the start of the experiment
    #[serde(with = "humantime_serde")]
    pub warmup: Duration,
    /// Transient cut at the end of the experiment
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// (Optional) Coarser interval size to resample the log to before analysis
    #[serde(with = "humantime_serde")]
    pub resample_period: Option<Duration>,
    /// Number of subsampling draws per interval and path
    pub sampling_iterations: usize,
    /// Base seed for all random draws
    pub seed: u64,
}

/// Neutrality classification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Normalized gap separating neutral from non-neutral bins
    pub gap_threshold: f64,
    /// Strategy for per-link (oracle) analysis
    pub link_strategy: Strategy,
    /// Strategy for link-sequence (end-to-end) analysis
    pub sequence_strategy: Strategy,
    /// Independent k-means runs combined by majority vote
    pub clustering_runs: usize,
    pub kmeans_max_iterations: usize,
    /// Fewer pooled gaps than this cannot be clustered
    pub min_clustering_points: usize,
    /// Classify with the gap threshold when there are too few gaps to cluster
    pub fallback_to_gap_threshold: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            loss_threshold: 0.01,
            bin_size: 1.0e9,
            min_packets: 10,
            warmup: Duration::from_secs(10),
            cooldown: Duration::from_secs(10),
            resample_period: None,
            sampling_iterations: 1,
            seed: 0,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            gap_threshold: 1.0 / 3.0,
            link_strategy: Strategy::GapThreshold,
            sequence_strategy: Strategy::GlobalClustering,
            clustering_runs: 7,
            kmeans_max_iterations: 1000,
            min_clustering_points: 2,
            fallback_to_gap_threshold: false,
        }
    }
}

impl EstimatorConfig {
    pub fn warmup_nanos(&self) -> u64 {
        duration_to_nanos(self.warmup)
    }

    pub fn cooldown_nanos(&self) -> u64 {
        duration_to_nanos(self.cooldown)
    }

    pub fn resample_nanos(&self) -> Option<u64> {
        self.resample_period.map(duration_to_nanos)
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid estimator configuration: {0}")]
    InvalidEstimator(String),
    #[error("Invalid classifier configuration: {0}")]
    InvalidClassifier(String),
    #[error("Invalid path thresholds: {0}")]
    InvalidThresholds(String),
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let estimator = &self.estimator;
        if !(estimator.loss_threshold > 0.0 && estimator.loss_threshold <= 1.0) {
            return Err(ValidationError::InvalidEstimator(format!(
                "loss_threshold must be in (0, 1], got {}",
                estimator.loss_threshold
            )));
        }
        if !(estimator.bin_size.is_finite() && estimator.bin_size > 0.0) {
            return Err(ValidationError::InvalidEstimator(format!(
                "bin_size must be a positive number, got {}",
                estimator.bin_size
            )));
        }
        if estimator.sampling_iterations == 0 {
            return Err(ValidationError::InvalidEstimator(
                "sampling_iterations must be at least 1".to_string(),
            ));
        }
        if estimator.resample_period == Some(Duration::ZERO) {
            return Err(ValidationError::InvalidEstimator(
                "resample_period cannot be zero; omit it to keep the recorded interval size"
                    .to_string(),
            ));
        }

        let classifier = &self.classifier;
        if !(classifier.gap_threshold.is_finite() && classifier.gap_threshold > 0.0) {
            return Err(ValidationError::InvalidClassifier(format!(
                "gap_threshold must be positive, got {}",
                classifier.gap_threshold
            )));
        }
        if classifier.clustering_runs == 0 {
            return Err(ValidationError::InvalidClassifier(
                "clustering_runs must be at least 1".to_string(),
            ));
        }
        if classifier.kmeans_max_iterations == 0 {
            return Err(ValidationError::InvalidClassifier(
                "kmeans_max_iterations must be at least 1".to_string(),
            ));
        }
        if classifier.min_clustering_points < 2 {
            return Err(ValidationError::InvalidClassifier(
                "min_clustering_points must be at least 2".to_string(),
            ));
        }

        if let Some(bad) = self
            .path_thresholds
            .iter()
            .find(|t| !(**t > 0.0 && **t <= 1.0))
        {
            return Err(ValidationError::InvalidThresholds(format!(
                "thresholds must be in (0, 1], got {}",
                bad
            )));
        }

        Ok(())
    }

    /// Thresholds for the path congestion table, falling back to the standard ladder.
    pub fn path_thresholds(&self) -> &[f64] {
        if self.path_thresholds.is_empty() {
            &DEFAULT_PATH_THRESHOLDS
        } else {
            &self.path_thresholds
        }
    }
}

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<AnalysisConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .with_context(|| format!("Failed to open config file {}", config_path.display()))?;
    let config: AnalysisConfig = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

    config.validate()?;

    Ok(config)
}

/// CLI arguments that can override YAML settings
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub loss_threshold: Option<f64>,
    pub bin_size: Option<f64>,
    pub resample_period: Option<Duration>,
    pub sampling_iterations: Option<usize>,
    pub gap_threshold: Option<f64>,
    pub sequence_strategy: Option<Strategy>,
    pub seed: Option<u64>,
}

/// Apply CLI overrides to a configuration
pub fn apply_overrides(
    config: &mut AnalysisConfig,
    overrides: &ConfigOverrides,
) -> Result<(), ValidationError> {
    if let Some(loss_threshold) = overrides.loss_threshold {
        info!("Overriding loss threshold: {}", loss_threshold);
        config.estimator.loss_threshold = loss_threshold;
    }
    if let Some(bin_size) = overrides.bin_size {
        config.estimator.bin_size = bin_size;
    }
    if let Some(period) = overrides.resample_period {
        info!("Overriding resample period: {:?}", period);
        config.estimator.resample_period = Some(period);
    }
    if let Some(iterations) = overrides.sampling_iterations {
        config.estimator.sampling_iterations = iterations;
    }
    if let Some(gap_threshold) = overrides.gap_threshold {
        config.classifier.gap_threshold = gap_threshold;
    }
    if let Some(strategy) = overrides.sequence_strategy {
        config.classifier.sequence_strategy = strategy;
    }
    if let Some(seed) = overrides.seed {
        config.estimator.seed = seed;
    }

    // Re-validate after applying overrides
    config.validate()
}
