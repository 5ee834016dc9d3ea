//! End-to-end neutrality analysis: load, estimate, classify, reduce, report.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::cache::{self, CacheFingerprint, SequenceEstimates};
use super::classifier::NeutralityClassifier;
use super::congestion::CongestionEstimator;
use super::reducer;
use super::report::*;
use super::topology::Topology;
use super::types::{ConfusionMatrix, LinkSequence, NeutralityVerdict};
use crate::config::AnalysisConfig;
use crate::measurement::ExperimentLog;
use crate::utils::format_nanos;

/// A measurement log and the topology it was recorded on.
pub struct AnalysisInput {
    pub log: ExperimentLog,
    pub topology: Topology,
    pub measurement_file: PathBuf,
    pub topology_file: PathBuf,
}

impl AnalysisInput {
    /// Loads both files, checks that they match and applies the configured resampling.
    pub fn load(measurement_file: &Path, topology_file: &Path, config: &AnalysisConfig) -> Result<Self> {
        let topology = Topology::load(topology_file)?;
        let mut log = ExperimentLog::load(measurement_file)?;
        topology
            .check_log(&log)
            .with_context(|| format!("{} does not match its topology", measurement_file.display()))?;

        if let Some(period) = config.estimator.resample_nanos() {
            log::info!(
                "Resampling {} intervals of {} to {}",
                log.num_intervals(),
                format_nanos(log.interval_size),
                format_nanos(period)
            );
            log = log.resample(period);
        }

        Ok(Self {
            log,
            topology,
            measurement_file: measurement_file.to_path_buf(),
            topology_file: topology_file.to_path_buf(),
        })
    }

    /// Base name for output files, e.g. `run-1s` for `run.bin` at 1s intervals.
    pub fn output_stem(&self) -> String {
        let stem = self
            .measurement_file
            .file_stem()
            .map_or_else(|| "measurements".into(), |s| s.to_string_lossy());
        format!("{}-{}", stem, format_nanos(self.log.interval_size))
    }
}

/// Classifies every link from oracle (link, path) measurements.
pub fn analyze_links(input: &AnalysisInput, config: &AnalysisConfig) -> (Vec<LinkReport>, ConfusionMatrix) {
    log::info!("Analyzing {} links...", input.log.num_edges);
    let estimator = CongestionEstimator::new(&input.log, &config.estimator);
    let entities: BTreeMap<usize, _> = estimator
        .link_probabilities(&input.topology)
        .into_iter()
        .enumerate()
        .collect();

    let classifier = NeutralityClassifier::new(&config.classifier);
    let mut rng = StdRng::seed_from_u64(config.estimator.seed);
    let verdicts = classifier.classify(config.classifier.link_strategy, &entities, &mut rng);

    let mut metrics = ConfusionMatrix::default();
    let links = entities
        .iter()
        .zip(verdicts)
        .map(|((&link, probabilities), (_, mut verdict))| {
            let actually_neutral = input.topology.is_link_neutral(link);
            verdict.score(actually_neutral);
            if let Some(outcome) = verdict.outcome {
                metrics.record(outcome);
            }
            LinkReport {
                link,
                probabilities: probability_samples(probabilities),
                verdict,
                actually_neutral,
            }
        })
        .collect();
    (links, metrics)
}

/// Sequence estimates from the cache when it matches, otherwise computed (and cached).
pub fn sequence_estimates(
    input: &AnalysisInput,
    config: &AnalysisConfig,
    cache_path: Option<&Path>,
) -> Result<SequenceEstimates> {
    let fingerprint = CacheFingerprint::new(&input.log, &input.topology, &config.estimator);
    if let Some(cached) = cache_path.and_then(|path| cache::load(path, &fingerprint)) {
        return Ok(cached);
    }
    let estimates = CongestionEstimator::new(&input.log, &config.estimator).sequence_estimates(&input.topology);
    if let Some(path) = cache_path {
        cache::store(path, &fingerprint, &estimates)?;
    }
    Ok(estimates)
}

/// Classifies link sequences. Only sequences shared by same-class pairs of both
/// classes are scored into the returned metrics.
pub fn analyze_sequences(
    estimates: &SequenceEstimates,
    topology: &Topology,
    config: &AnalysisConfig,
) -> (Vec<SequenceReport>, ConfusionMatrix, BTreeMap<LinkSequence, NeutralityVerdict>) {
    log::info!("Classifying {} link sequences...", estimates.len());
    let entities: BTreeMap<LinkSequence, _> = estimates
        .iter()
        .map(|(links, estimate)| (links.clone(), estimate.estimated.clone()))
        .collect();

    let classifier = NeutralityClassifier::new(&config.classifier);
    // Distinct stream from the link stage
    let mut rng = StdRng::seed_from_u64(config.estimator.seed.wrapping_add(1));
    let mut verdicts = classifier.classify(config.classifier.sequence_strategy, &entities, &mut rng);

    let mut metrics = ConfusionMatrix::default();
    let mut sequences = Vec::with_capacity(estimates.len());
    for (links, estimate) in estimates {
        let actually_neutral = topology.is_sequence_neutral(links);
        let verdict = match verdicts.get_mut(links) {
            Some(verdict) => verdict,
            None => continue,
        };
        verdict.score(actually_neutral);
        let comparable = estimate.is_comparable();
        if comparable {
            if let Some(outcome) = verdict.outcome {
                metrics.record(outcome);
            }
        }
        sequences.push(SequenceReport {
            links: estimate.ordered_links.clone(),
            estimated: probability_samples(&estimate.estimated),
            truth: probability_samples(&estimate.truth),
            valid_intervals: estimate.valid_intervals,
            comparable,
            verdict: verdict.clone(),
            actually_neutral,
        });
    }
    (sequences, metrics, verdicts)
}

/// Runs every stage and assembles the report.
pub fn run_analysis(
    input: &AnalysisInput,
    config: &AnalysisConfig,
    cache_path: Option<&Path>,
) -> Result<AnalysisReport> {
    let estimator = CongestionEstimator::new(&input.log, &config.estimator);
    let window = estimator.window();
    if window.is_empty() {
        log::warn!(
            "No intervals left after the {} warm-up and {} cool-down cuts",
            format_nanos(config.estimator.warmup_nanos()),
            format_nanos(config.estimator.cooldown_nanos())
        );
    }

    let (links, link_metrics) = analyze_links(input, config);
    let estimates = sequence_estimates(input, config, cache_path)?;
    let (sequences, sequence_metrics, verdicts) = analyze_sequences(&estimates, &input.topology, config);

    let decisions = reducer::reduce(&verdicts);
    let reduction = ReductionReport {
        kept: reducer::kept(&decisions).cloned().collect(),
        granularity: reducer::granularity(&decisions),
        coverage: reducer::coverage(&decisions, &input.topology.non_neutral_links),
        decisions,
    };
    log::info!(
        "{} non-neutral link sequences after reduction",
        reduction.kept.len()
    );

    let path_congestion = estimator.path_congestion(&input.topology, config.path_thresholds());

    Ok(AnalysisReport {
        metadata: AnalysisMetadata {
            analysis_timestamp: chrono::Utc::now().to_rfc3339(),
            measurement_file: input.measurement_file.display().to_string(),
            topology_file: input.topology_file.display().to_string(),
            interval_size: format_nanos(input.log.interval_size),
            num_intervals: input.log.num_intervals(),
            analyzed_intervals: window.len(),
            num_links: input.log.num_edges,
            num_paths: input.log.num_paths,
            link_strategy: config.classifier.link_strategy,
            sequence_strategy: config.classifier.sequence_strategy,
        },
        links,
        link_metrics,
        sequences,
        sequence_metrics,
        reduction,
        path_congestion,
    })
}

/// Writes the JSON, text and TSV outputs of `report` into `output_dir`.
pub fn write_reports(report: &AnalysisReport, output_dir: &Path, stem: &str) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    generate_json_report(report, &output_dir.join(format!("{stem}-report.json")))?;
    generate_text_report(report, &output_dir.join(format!("{stem}-report.txt")))?;
    generate_probability_table(report, &output_dir.join(format!("{stem}-probabilities.tsv")))?;
    generate_path_congestion_table(
        &report.path_congestion,
        &output_dir.join(format!("{stem}-path-congestion.tsv")),
    )?;
    Ok(())
}
