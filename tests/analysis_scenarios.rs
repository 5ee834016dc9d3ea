//! End-to-end neutrality inference on synthetic experiments.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use neutralsim::analysis::{
    pipeline, run_analysis, write_reports, AnalysisInput, Neutrality, PathSpec, Topology,
};
use neutralsim::config::load_config;
use neutralsim::measurement::{ExperimentLog, LogParams};

const SECOND: u64 = 1_000_000_000;
const INTERVALS: u64 = 40;

/// Two groups of four paths. Paths 0-3 share link 0, paths 4-7 share link 5.
/// In each group the first two paths are class 1 and the last two class 2.
fn topology() -> Topology {
    let path = |links: [usize; 2], class| PathSpec {
        links: links.to_vec(),
        traffic_class: Some(class),
        background: false,
    };
    Topology {
        num_links: 10,
        paths: vec![
            path([0, 1], 0),
            path([0, 2], 0),
            path([0, 3], 1),
            path([0, 4], 1),
            path([5, 6], 0),
            path([5, 7], 0),
            path([5, 8], 1),
            path([5, 9], 1),
        ],
        non_neutral_links: [0].into_iter().collect(),
    }
}

/// Link 0 congests class-2 traffic in a quarter of the intervals and class-1
/// traffic in a tenth. Link 5 congests both classes in a fifth.
fn record(topology: &Topology) -> ExperimentLog {
    let mut log = ExperimentLog::new(
        LogParams {
            ts_start: 0,
            expected_duration: INTERVALS * SECOND,
            interval_size: SECOND,
            num_edges: topology.num_links,
            num_paths: topology.paths.len(),
            packet_size_threshold: 0,
        },
        &topology.routing_pairs(),
    )
    .unwrap();

    for i in 0..INTERVALS {
        let (ts_in, ts_out) = (i * SECOND + 1, i * SECOND + 2);
        for (p, spec) in topology.paths.iter().enumerate() {
            let shared = spec.links[0];
            log.count_packet_in_flight_path(p, ts_in, ts_out, 1500, 100);
            for &link in &spec.links {
                log.count_packet_in_flight_edge(link, Some(p), ts_in, ts_out, 1500, 100);
            }
            let congested = match (shared, spec.traffic_class) {
                (0, Some(1)) => i % 4 == 0,
                (0, _) => i % 10 == 0,
                _ => i % 5 == 0,
            };
            if congested {
                log.count_packet_dropped(shared, p, ts_in, ts_out, 1500, 5);
            }
        }
    }
    log
}

fn write_inputs(dir: &Path) {
    let topology = topology();
    record(&topology).save(&dir.join("run.bin")).unwrap();
    fs::write(dir.join("topology.yaml"), serde_yaml::to_string(&topology).unwrap()).unwrap();
    fs::write(
        dir.join("analysis.yaml"),
        "estimator:\n  warmup: 0s\n  cooldown: 0s\n  sampling_iterations: 3\n",
    )
    .unwrap();
}

fn load(dir: &Path) -> (AnalysisInput, neutralsim::config::AnalysisConfig) {
    let config = load_config(&dir.join("analysis.yaml")).unwrap();
    let input = AnalysisInput::load(&dir.join("run.bin"), &dir.join("topology.yaml"), &config).unwrap();
    (input, config)
}

#[test]
fn detects_discriminating_link_sequence() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let (input, config) = load(dir.path());
    assert_eq!(input.log.num_intervals(), INTERVALS as usize);

    let report = run_analysis(&input, &config, None).unwrap();
    assert_eq!(report.metadata.analyzed_intervals, INTERVALS as usize);

    assert_eq!(report.sequences.len(), 2);
    let discriminating = report.sequences.iter().find(|s| s.links == vec![0]).unwrap();
    assert!(discriminating.comparable);
    assert_eq!(discriminating.verdict.neutrality, Neutrality::NonNeutral);
    let class1 = &discriminating.estimated[0];
    let class2 = &discriminating.estimated[1];
    assert_eq!((class1.class_bin.as_str(), class2.class_bin.as_str()), ("b1c1", "b1c2"));
    assert!((class1.probabilities[0] - 0.1).abs() < 1e-9);
    assert!((class2.probabilities[0] - 0.25).abs() < 1e-9);
    assert!((discriminating.truth[1].probabilities[0] - 0.25).abs() < 1e-9);

    let fair = report.sequences.iter().find(|s| s.links == vec![5]).unwrap();
    assert_eq!(fair.verdict.neutrality, Neutrality::Neutral);

    assert_eq!(report.sequence_metrics.true_positives, 1);
    assert_eq!(report.sequence_metrics.true_negatives, 1);
    assert_eq!(report.reduction.kept, vec![BTreeSet::from([0])]);
    assert_eq!(report.reduction.granularity, Some(1.0));
    assert_eq!(report.reduction.coverage, Some(1.0));

    // oracle per-link analysis agrees
    assert_eq!(report.links[0].verdict.neutrality, Neutrality::NonNeutral);
    assert_eq!(report.links[5].verdict.neutrality, Neutrality::Neutral);
    assert_eq!(report.links[1].verdict.neutrality, Neutrality::Undecidable);
    assert_eq!(report.link_metrics.decided(), 2);

    let out = dir.path().join("out");
    write_reports(&report, &out, &input.output_stem()).unwrap();
    for name in [
        "run-1s-report.json",
        "run-1s-report.txt",
        "run-1s-probabilities.tsv",
        "run-1s-path-congestion.tsv",
    ] {
        assert!(out.join(name).exists(), "{name} missing");
    }
}

#[test]
fn cached_estimates_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let (input, config) = load(dir.path());
    let cache = dir.path().join("estimates.zst");

    let first = pipeline::sequence_estimates(&input, &config, Some(&cache)).unwrap();
    assert!(cache.exists());
    let second = pipeline::sequence_estimates(&input, &config, Some(&cache)).unwrap();
    assert_eq!(first, second);

    // other estimator settings miss the cache
    let mut other = config.clone();
    other.estimator.loss_threshold = 0.1;
    let third = pipeline::sequence_estimates(&input, &other, Some(&cache)).unwrap();
    assert!(third.values().all(|e| e.estimated.values().flatten().all(|&p| p == 0.0)));
}

#[test]
fn resampling_keeps_the_verdicts() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let (_, mut config) = load(dir.path());
    config.estimator.resample_period = Some(std::time::Duration::from_secs(2));
    let input = AnalysisInput::load(&dir.path().join("run.bin"), &dir.path().join("topology.yaml"), &config)
        .unwrap();
    assert_eq!(input.log.num_intervals(), 20);
    assert_eq!(input.output_stem(), "run-2s");

    let report = run_analysis(&input, &config, None).unwrap();
    let discriminating = report.sequences.iter().find(|s| s.links == vec![0]).unwrap();
    assert_eq!(discriminating.verdict.neutrality, Neutrality::NonNeutral);
}
