//! Report generation for neutrality inference.
//!
//! Generates a JSON report, TSV tables for plotting, and a human-readable
//! text report.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::classifier::Strategy;
use super::congestion::{PathCongestionTable, PathLossSeries};
use super::reducer::ReductionDecision;
use super::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analysis_timestamp: String,
    pub measurement_file: String,
    pub topology_file: String,
    /// Interval size after resampling, e.g. `1s`.
    pub interval_size: String,
    pub num_intervals: usize,
    pub analyzed_intervals: usize,
    pub num_links: usize,
    pub num_paths: usize,
    pub link_strategy: Strategy,
    pub sequence_strategy: Strategy,
}

/// Probabilities of one class and volume bin, keyed for JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilitySample {
    pub class_bin: String,
    pub bin: u64,
    pub class: usize,
    pub probabilities: Vec<f64>,
}

pub fn probability_samples(probabilities: &ClassBinProbabilities) -> Vec<ProbabilitySample> {
    probabilities
        .iter()
        .map(|(key, values)| ProbabilitySample {
            class_bin: key.to_string(),
            bin: key.bin,
            class: key.class,
            probabilities: values.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkReport {
    pub link: usize,
    pub probabilities: Vec<ProbabilitySample>,
    pub verdict: NeutralityVerdict,
    pub actually_neutral: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    /// Zero-based links in forwarding order.
    pub links: Vec<usize>,
    pub estimated: Vec<ProbabilitySample>,
    pub truth: Vec<ProbabilitySample>,
    pub valid_intervals: usize,
    /// Shared by a class-1 pair and a class-2 pair; only these are scored.
    pub comparable: bool,
    pub verdict: NeutralityVerdict,
    pub actually_neutral: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionReport {
    pub decisions: Vec<ReductionDecision>,
    pub kept: Vec<LinkSequence>,
    /// Mean length of the kept sequences.
    pub granularity: Option<f64>,
    /// Fraction of non-neutral links found in a kept sequence.
    pub coverage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub metadata: AnalysisMetadata,
    pub links: Vec<LinkReport>,
    pub link_metrics: ConfusionMatrix,
    pub sequences: Vec<SequenceReport>,
    pub sequence_metrics: ConfusionMatrix,
    pub reduction: ReductionReport,
    pub path_congestion: PathCongestionTable,
}

/// Generate JSON report
pub fn generate_json_report(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// One row per sequence, class bin, kind and probability.
pub fn render_probability_table(report: &AnalysisReport) -> String {
    let mut lines = vec!["links\tclass_bin\tkind\tprobability".to_string()];
    for sequence in &report.sequences {
        let links = format_links(&sequence.links);
        for (kind, samples) in [("estimated", &sequence.estimated), ("true", &sequence.truth)] {
            for sample in samples {
                for probability in &sample.probabilities {
                    lines.push(format!("{}\t{}\t{}\t{:.6}", links, sample.class_bin, kind, probability));
                }
            }
        }
    }
    lines.join("\n") + "\n"
}

pub fn generate_probability_table(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_probability_table(report))
        .with_context(|| format!("Failed to write probability table to {}", output_path.display()))?;
    log::info!("Probability table written to {}", output_path.display());
    Ok(())
}

/// Threshold as a percentage without trailing zeros, e.g. `0.0001%`.
fn threshold_label(threshold: f64) -> String {
    let fixed = format!("{:.6}", threshold * 100.0);
    format!("{}%", fixed.trim_end_matches('0').trim_end_matches('.'))
}

/// Path rows against the threshold ladder, `-` where a path had no traffic.
pub fn render_path_congestion(table: &PathCongestionTable) -> String {
    let mut header = vec!["path".to_string(), "class".to_string()];
    header.extend(table.thresholds.iter().map(|&t| threshold_label(t)));
    let mut lines = vec![header.join("\t")];
    for row in &table.rows {
        let mut cells = vec![(row.path + 1).to_string(), (row.traffic_class + 1).to_string()];
        cells.extend(row.probabilities.iter().map(|p| match p {
            Some(p) => format!("{:.6}", p),
            None => "-".to_string(),
        }));
        lines.push(cells.join("\t"));
    }
    lines.join("\n") + "\n"
}

pub fn generate_path_congestion_table(table: &PathCongestionTable, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_path_congestion(table)).with_context(|| {
        format!("Failed to write path congestion table to {}", output_path.display())
    })?;
    log::info!("Path congestion table written to {}", output_path.display());
    Ok(())
}

/// Per-interval loss of every path, one column per path.
pub fn generate_interval_loss_table(series: &[PathLossSeries], output_path: &Path) -> Result<()> {
    let mut header = vec!["interval".to_string()];
    header.extend(
        series
            .iter()
            .map(|s| format!("path{}c{}", s.path + 1, s.traffic_class + 1)),
    );
    let mut lines = vec![header.join("\t")];
    let count = series.iter().map(|s| s.losses.len()).max().unwrap_or(0);
    for interval in 0..count {
        let mut cells = vec![interval.to_string()];
        cells.extend(series.iter().map(|s| match s.losses.get(interval).copied().flatten() {
            Some(loss) => format!("{:.6}", loss),
            None => "-".to_string(),
        }));
        lines.push(cells.join("\t"));
    }
    fs::write(output_path, lines.join("\n") + "\n")
        .with_context(|| format!("Failed to write interval loss table to {}", output_path.display()))?;
    log::info!("Interval loss table written to {}", output_path.display());
    Ok(())
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.1}%", v * 100.0))
}

fn section(lines: &mut Vec<String>, title: &str) {
    lines.push("=".repeat(80));
    lines.push(format!("{:^80}", title));
    lines.push("=".repeat(80));
    lines.push(String::new());
}

fn push_metrics(lines: &mut Vec<String>, metrics: &ConfusionMatrix) {
    lines.push(format!(
        "  Decided: {} ({} neutral, {} non-neutral)",
        metrics.decided(),
        metrics.total_neutral,
        metrics.total_non_neutral
    ));
    lines.push(format!(
        "  True positives: {} ({})",
        metrics.true_positives,
        percent(metrics.true_positive_rate())
    ));
    lines.push(format!(
        "  False negatives: {} ({})",
        metrics.false_negatives,
        percent(metrics.false_negative_rate())
    ));
    lines.push(format!(
        "  True negatives: {} ({})",
        metrics.true_negatives,
        percent(metrics.true_negative_rate())
    ));
    lines.push(format!(
        "  False positives: {} ({})",
        metrics.false_positives,
        percent(metrics.false_positive_rate())
    ));
    lines.push(String::new());
}

fn push_samples(lines: &mut Vec<String>, kind: &str, samples: &[ProbabilitySample]) {
    for sample in samples {
        let values: Vec<String> = sample
            .probabilities
            .iter()
            .map(|p| format!("{:.2}%", p * 100.0))
            .collect();
        lines.push(format!("    {} {}: {}", kind, sample.class_bin, values.join(" ")));
    }
}

fn outcome_suffix(verdict: &NeutralityVerdict) -> String {
    verdict
        .outcome
        .map(|outcome| format!(" [{}]", outcome))
        .unwrap_or_default()
}

pub fn render_text_report(report: &AnalysisReport) -> String {
    let mut lines: Vec<String> = Vec::new();

    section(&mut lines, "NEUTRALSIM NEUTRALITY INFERENCE");
    let meta = &report.metadata;
    lines.push(format!("Analysis Date: {}", meta.analysis_timestamp));
    lines.push(format!("Measurements: {}", meta.measurement_file));
    lines.push(format!("Topology: {}", meta.topology_file));
    lines.push(format!(
        "Intervals: {} of {} analyzed, {} each",
        meta.analyzed_intervals, meta.num_intervals, meta.interval_size
    ));
    lines.push(format!("Links: {}, paths: {}", meta.num_links, meta.num_paths));
    lines.push(String::new());

    section(&mut lines, "PER-LINK ANALYSIS (ORACLE DATA)");
    lines.push(format!("Strategy: {}", meta.link_strategy));
    lines.push(String::new());
    for link in &report.links {
        if link.probabilities.is_empty() {
            continue;
        }
        lines.push(format!(
            "  Link {}: {}{}",
            link.link + 1,
            link.verdict.label(),
            outcome_suffix(&link.verdict)
        ));
        push_samples(&mut lines, "congestion", &link.probabilities);
    }
    lines.push(String::new());
    push_metrics(&mut lines, &report.link_metrics);

    section(&mut lines, "LINK SEQUENCES");
    lines.push(format!("Strategy: {}", meta.sequence_strategy));
    lines.push(String::new());
    for sequence in &report.sequences {
        lines.push(format!(
            "  Sequence {}: {}{}{}",
            format_links(&sequence.links),
            sequence.verdict.label(),
            outcome_suffix(&sequence.verdict),
            if sequence.comparable { "" } else { " (not scored)" }
        ));
        push_samples(&mut lines, "estimated", &sequence.estimated);
        push_samples(&mut lines, "true", &sequence.truth);
    }
    lines.push(String::new());
    push_metrics(&mut lines, &report.sequence_metrics);

    section(&mut lines, "REDUCED REPORT");
    if report.reduction.kept.is_empty() {
        lines.push("No non-neutral link sequences.".to_string());
    }
    for sequence in &report.reduction.kept {
        lines.push(format!("  Non-neutral: {}", format_links(sequence)));
    }
    for decision in report.reduction.decisions.iter().filter(|d| !d.keep) {
        lines.push(format!(
            "  Dropped {}: explained by {}",
            format_links(&decision.sequence),
            format_links(&decision.non_neutral_union)
        ));
    }
    lines.push(String::new());
    lines.push(format!(
        "Granularity: {}",
        report
            .reduction
            .granularity
            .map_or_else(|| "n/a".to_string(), |g| format!("{:.2} links", g))
    ));
    lines.push(format!("Coverage: {}", percent(report.reduction.coverage)));
    lines.push(String::new());

    // Footer
    lines.push("=".repeat(80));
    lines.join("\n") + "\n"
}

/// Generate human-readable text report
pub fn generate_text_report(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_text_report(report))
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

/// Print a summary to stdout
pub fn print_summary(report: &AnalysisReport) {
    println!("\n=== NEUTRALITY INFERENCE SUMMARY ===\n");
    println!(
        "Intervals: {} of {} ({} each)",
        report.metadata.analyzed_intervals, report.metadata.num_intervals, report.metadata.interval_size
    );
    println!("Link sequences: {}", report.sequences.len());

    let non_neutral: Vec<String> = report.reduction.kept.iter().map(|s| format_links(s)).collect();
    if non_neutral.is_empty() {
        println!("\nNo non-neutral link sequences detected.");
    } else {
        println!("\nNon-neutral link sequences: {}", non_neutral.join(" "));
    }

    println!("\nSequence detection:");
    println!(
        "  TPR: {}  TNR: {}",
        percent(report.sequence_metrics.true_positive_rate()),
        percent(report.sequence_metrics.true_negative_rate())
    );
    println!("  Granularity: {:?}", report.reduction.granularity);
    println!("  Coverage: {}", percent(report.reduction.coverage));

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::congestion::PathCongestionRow;

    fn report() -> AnalysisReport {
        let mut estimated = ClassBinProbabilities::new();
        estimated.insert(ClassBin::new(1, 0), vec![0.1]);
        estimated.insert(ClassBin::new(1, 1), vec![0.3, 0.25]);
        let mut verdict = NeutralityVerdict {
            neutrality: Neutrality::NonNeutral,
            strength: Some(Strength::Strong),
            ..NeutralityVerdict::undecidable()
        };
        verdict.score(false);
        let links: LinkSequence = [0, 2].into_iter().collect();
        AnalysisReport {
            metadata: AnalysisMetadata {
                analysis_timestamp: "2026-01-01T00:00:00+00:00".to_string(),
                measurement_file: "run.bin".to_string(),
                topology_file: "topology.yaml".to_string(),
                interval_size: "1s".to_string(),
                num_intervals: 40,
                analyzed_intervals: 20,
                num_links: 3,
                num_paths: 4,
                link_strategy: Strategy::GapThreshold,
                sequence_strategy: Strategy::GlobalClustering,
            },
            links: Vec::new(),
            link_metrics: ConfusionMatrix::default(),
            sequences: vec![SequenceReport {
                links: vec![2, 0],
                estimated: probability_samples(&estimated),
                truth: Vec::new(),
                valid_intervals: 20,
                comparable: true,
                verdict,
                actually_neutral: false,
            }],
            sequence_metrics: [DetectionOutcome::TruePositive].into_iter().collect(),
            reduction: ReductionReport {
                decisions: Vec::new(),
                kept: vec![links],
                granularity: Some(2.0),
                coverage: Some(1.0),
            },
            path_congestion: PathCongestionTable {
                thresholds: vec![0.1, 0.01],
                rows: vec![PathCongestionRow {
                    path: 0,
                    traffic_class: 1,
                    probabilities: vec![Some(0.0), None],
                }],
            },
        }
    }

    #[test]
    fn test_probability_table_rows() {
        let table = render_probability_table(&report());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "{3, 1}\tb1c1\testimated\t0.100000");
        assert_eq!(lines[3], "{3, 1}\tb1c2\testimated\t0.250000");
    }

    #[test]
    fn test_path_congestion_table() {
        let table = render_path_congestion(&report().path_congestion);
        assert_eq!(table, "path\tclass\t10%\t1%\n1\t2\t0.000000\t-\n");
    }

    #[test]
    fn test_threshold_label() {
        assert_eq!(threshold_label(0.1), "10%");
        assert_eq!(threshold_label(0.0025), "0.25%");
        assert_eq!(threshold_label(0.000001), "0.0001%");
    }

    #[test]
    fn test_text_report_mentions_verdicts() {
        let text = render_text_report(&report());
        assert!(text.contains("Sequence {3, 1}: non-neutral (strong) [true positive]"));
        assert!(text.contains("Non-neutral: {1, 3}"));
        assert!(text.contains("Coverage: 100.0%"));
    }

    #[test]
    fn test_json_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        generate_json_report(&report(), &path).unwrap();
        let parsed: AnalysisReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.sequences[0].estimated, report().sequences[0].estimated);
        assert_eq!(parsed.metadata.sequence_strategy, Strategy::GlobalClustering);
    }
}
