//! Congestion probability estimation.
//!
//! An interval is congested for a link, path or (link, path) pair when its loss
//! rate reaches the configured threshold. Congestion probabilities are the
//! fraction of valid intervals flagged congested, where valid intervals lie
//! outside the warm-up and cool-down cuts and carry enough packets.
//!
//! Link sequences are not observable directly. For two paths sharing a
//! sequence, with per-interval good probabilities `P1`, `P2` and joint good
//! probability `P12`, the sequence is good with probability `P1 * P2 / P12`.
//! Path states are decided by subsampling both paths down to a common packet
//! count, so that paths with more traffic are not judged on more evidence.

use std::collections::BTreeMap;
use std::ops::Range;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::topology::{SequenceInfo, Topology};
use super::types::{volume_bin, ClassBin, ClassBinProbabilities, LinkSequence};
use crate::config::EstimatorConfig;
use crate::measurement::{ExperimentLog, LinkMeasurement};

/// Lower bound on the joint good probability, avoids dividing by zero.
pub const MIN_JOINT_PROBABILITY: f64 = 1.602e-19;

/// Probability that a link sequence shared by two paths is congested.
pub fn estimate_shared_congestion(good1: f64, good2: f64, good12: f64) -> f64 {
    1.0 - (good1 * good2 / good12.max(MIN_JOINT_PROBABILITY)).clamp(0.0, 1.0)
}

/// Estimated and true congestion probabilities for one link sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceEstimate {
    pub links: LinkSequence,
    pub ordered_links: Vec<usize>,
    /// From end-to-end path data only.
    pub estimated: ClassBinProbabilities,
    /// From per-link data, for validation.
    pub truth: ClassBinProbabilities,
    /// A pair of class-1 paths shares the sequence.
    pub has_class1_pair: bool,
    /// A pair of class-2 paths shares the sequence.
    pub has_class2_pair: bool,
    pub valid_intervals: usize,
}

impl SequenceEstimate {
    /// Both classes are represented by a same-class path pair.
    pub fn is_comparable(&self) -> bool {
        self.has_class1_pair && self.has_class2_pair
    }
}

/// Path congestion probabilities for a ladder of loss thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathCongestionTable {
    pub thresholds: Vec<f64>,
    pub rows: Vec<PathCongestionRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathCongestionRow {
    pub path: usize,
    pub traffic_class: usize,
    /// One entry per threshold; `None` when no interval had traffic.
    pub probabilities: Vec<Option<f64>>,
}

/// Loss rate of one path in every interval of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathLossSeries {
    pub path: usize,
    pub traffic_class: usize,
    pub losses: Vec<Option<f64>>,
}

pub struct CongestionEstimator<'a> {
    log: &'a ExperimentLog,
    config: &'a EstimatorConfig,
}

impl<'a> CongestionEstimator<'a> {
    pub fn new(log: &'a ExperimentLog, config: &'a EstimatorConfig) -> Self {
        Self { log, config }
    }

    /// Intervals left after removing the warm-up and cool-down transients.
    pub fn window(&self) -> Range<usize> {
        let count = self.log.num_intervals();
        let size = self.log.interval_size.max(1);
        let first = usize::try_from(self.config.warmup_nanos() / size).unwrap_or(usize::MAX);
        let last_cut = usize::try_from(self.config.cooldown_nanos() / size).unwrap_or(usize::MAX);
        let end = count.saturating_sub(last_cut);
        first.min(end)..end
    }

    fn is_congested(&self, loss: f64) -> bool {
        loss >= self.config.loss_threshold
    }

    /// Congestion probability and mean packets in flight over the valid
    /// intervals among `measurements`, or `None` if none is valid.
    fn congestion_probability<'m>(
        &self,
        measurements: impl Iterator<Item = &'m LinkMeasurement>,
    ) -> Option<(f64, f64)> {
        let mut valid = 0usize;
        let mut congested = 0usize;
        let mut packets = 0u64;
        for m in measurements {
            let Some(loss) = m.loss_rate() else { continue };
            if m.in_flight < self.config.min_packets {
                continue;
            }
            valid += 1;
            packets += m.in_flight;
            if self.is_congested(loss) {
                congested += 1;
            }
        }
        (valid > 0).then(|| (congested as f64 / valid as f64, packets as f64 / valid as f64))
    }

    /// Per-link congestion probabilities of every classified path crossing the
    /// link, from oracle (link, path) data. Indexed by link.
    pub fn link_probabilities(&self, topology: &Topology) -> Vec<ClassBinProbabilities> {
        (0..self.log.num_edges)
            .into_par_iter()
            .map(|link| self.link_class_bins(link, topology))
            .collect()
    }

    fn link_class_bins(&self, link: usize, topology: &Topology) -> ClassBinProbabilities {
        let window = self.window();
        let mut result = ClassBinProbabilities::new();
        for (path, spec) in topology.paths.iter().enumerate() {
            let Some(class) = spec.traffic_class else { continue };
            if spec.background {
                continue;
            }
            let crosses = self
                .log
                .global
                .edge_path(link, path)
                .is_some_and(|m| m.in_flight > 0);
            if !crosses {
                continue;
            }
            let measurements = self.log.intervals[window.clone()]
                .iter()
                .filter_map(|snapshot| snapshot.edge_path(link, path));
            if let Some((probability, avg_in_flight)) = self.congestion_probability(measurements) {
                let bin = volume_bin(avg_in_flight, self.config.bin_size);
                result
                    .entry(ClassBin::new(bin, class))
                    .or_default()
                    .push(probability);
            }
        }
        result
    }

    /// Fraction of window intervals with traffic whose path loss reaches each threshold.
    pub fn path_congestion(&self, topology: &Topology, thresholds: &[f64]) -> PathCongestionTable {
        let window = self.window();
        let rows = classified_paths(topology)
            .filter(|&(path, _)| path < self.log.num_paths)
            .map(|(path, traffic_class)| {
                let losses: Vec<f64> = self.log.intervals[window.clone()]
                    .iter()
                    .filter_map(|snapshot| snapshot.paths[path].loss_rate())
                    .collect();
                let probabilities = thresholds
                    .iter()
                    .map(|&threshold| {
                        (!losses.is_empty()).then(|| {
                            losses.iter().filter(|&&loss| loss >= threshold).count() as f64
                                / losses.len() as f64
                        })
                    })
                    .collect();
                PathCongestionRow {
                    path,
                    traffic_class,
                    probabilities,
                }
            })
            .collect();
        PathCongestionTable {
            thresholds: thresholds.to_vec(),
            rows,
        }
    }

    /// Loss rate of every classified path in every interval, transients included.
    pub fn interval_path_loss(&self, topology: &Topology) -> Vec<PathLossSeries> {
        classified_paths(topology)
            .filter(|&(path, _)| path < self.log.num_paths)
            .map(|(path, traffic_class)| PathLossSeries {
                path,
                traffic_class,
                losses: self
                    .log
                    .intervals
                    .iter()
                    .map(|snapshot| snapshot.paths[path].loss_rate())
                    .collect(),
            })
            .collect()
    }

    /// Estimates every link sequence of the topology in parallel.
    ///
    /// Each sequence draws from its own generator seeded from the configured
    /// seed and the sequence's position, so results do not depend on scheduling.
    pub fn sequence_estimates(&self, topology: &Topology) -> BTreeMap<LinkSequence, SequenceEstimate> {
        let sequences: Vec<SequenceInfo> = topology.link_sequences().into_values().collect();
        log::info!(
            "Estimating {} link sequences over {} intervals",
            sequences.len(),
            self.window().len()
        );
        sequences
            .par_iter()
            .enumerate()
            .map(|(index, info)| {
                let mut rng = StdRng::seed_from_u64(sequence_seed(self.config.seed, index));
                let estimate = self.estimate_sequence(info, topology, &mut rng);
                (estimate.links.clone(), estimate)
            })
            .collect()
    }

    /// Estimates one link sequence from the paths that share it.
    pub fn estimate_sequence<R: Rng + ?Sized>(
        &self,
        info: &SequenceInfo,
        topology: &Topology,
        rng: &mut R,
    ) -> SequenceEstimate {
        let window = self.window();
        let paths: Vec<usize> = info.paths.iter().copied().collect();
        let intervals = &self.log.intervals;

        // Per window interval: the good/congested state of each path, or None if unusable
        let states: Vec<Option<Vec<bool>>> = window
            .clone()
            .map(|i| self.path_states(&intervals[i].paths, &paths, rng))
            .collect();
        let valid: Vec<(usize, &Vec<bool>)> = window
            .clone()
            .zip(&states)
            .filter_map(|(i, state)| state.as_ref().map(|s| (i, s)))
            .collect();

        let mut estimate = SequenceEstimate {
            links: info.links.clone(),
            ordered_links: info.ordered_links.clone(),
            estimated: ClassBinProbabilities::new(),
            truth: ClassBinProbabilities::new(),
            has_class1_pair: false,
            has_class2_pair: false,
            valid_intervals: valid.len(),
        };
        log::debug!(
            "Sequence {:?}: {} valid intervals",
            info.ordered_links,
            valid.len()
        );

        for &(p1, p2) in &info.path_pairs {
            let class = match (topology.paths[p1].traffic_class, topology.paths[p2].traffic_class) {
                (Some(c1), Some(c2)) if c1 == c2 => c1,
                _ => continue,
            };
            match class {
                0 => estimate.has_class1_pair = true,
                1 => estimate.has_class2_pair = true,
                _ => {}
            }
            if valid.is_empty() {
                continue;
            }

            let (Ok(a), Ok(b)) = (paths.binary_search(&p1), paths.binary_search(&p2)) else {
                continue;
            };
            let n = valid.len() as f64;
            let good1 = valid.iter().filter(|(_, s)| s[a]).count() as f64 / n;
            let good2 = valid.iter().filter(|(_, s)| s[b]).count() as f64 / n;
            let good12 = valid.iter().filter(|(_, s)| s[a] && s[b]).count() as f64 / n;
            let estimated = estimate_shared_congestion(good1, good2, good12);

            let truly_congested = valid
                .iter()
                .filter(|&&(i, _)| {
                    info.links.iter().any(|&link| {
                        [p1, p2].iter().any(|&p| {
                            intervals[i]
                                .edge_path(link, p)
                                .and_then(LinkMeasurement::loss_rate)
                                .is_some_and(|loss| self.is_congested(loss))
                        })
                    })
                })
                .count() as f64;
            let truth = truly_congested / n;

            let avg_in_flight = |p: usize| {
                valid.iter().map(|&(i, _)| intervals[i].paths[p].in_flight).sum::<u64>() as f64 / n
            };
            let bin1 = volume_bin(avg_in_flight(p1), self.config.bin_size);
            let bin2 = volume_bin(avg_in_flight(p2), self.config.bin_size);
            if bin1 != bin2 {
                log::debug!(
                    "Sequence {:?}: paths {} and {} fall in different volume bins ({} vs {})",
                    info.ordered_links,
                    p1,
                    p2,
                    bin1,
                    bin2
                );
                continue;
            }

            log::debug!(
                "Sequence {:?} via paths {} and {}: estimated {:.2}%, true {:.2}%",
                info.ordered_links,
                p1,
                p2,
                100.0 * estimated,
                100.0 * truth
            );
            let key = ClassBin::new(bin1, class);
            estimate.estimated.entry(key).or_default().push(estimated);
            estimate.truth.entry(key).or_default().push(truth);
        }
        estimate
    }

    /// Majority good/congested state of each path in one interval, from
    /// `sampling_iterations` subsamples at the smallest packet count among the
    /// paths. `None` if any path has too little traffic.
    fn path_states<R: Rng + ?Sized>(
        &self,
        measurements: &[LinkMeasurement],
        paths: &[usize],
        rng: &mut R,
    ) -> Option<Vec<bool>> {
        let common = paths
            .iter()
            .map(|&p| measurements.get(p).map_or(0, |m| m.in_flight))
            .min()?;
        if common < self.config.min_packets {
            return None;
        }
        paths
            .iter()
            .map(|&p| {
                let measurement = measurements.get(p)?;
                let mut good = 0usize;
                let mut congested = 0usize;
                for _ in 0..self.config.sampling_iterations {
                    let mut draw = measurement.clone();
                    draw.sample(common, rng);
                    if self.is_congested(draw.loss_rate()?) {
                        congested += 1;
                    } else {
                        good += 1;
                    }
                }
                Some(good > congested)
            })
            .collect()
    }
}

fn classified_paths(topology: &Topology) -> impl Iterator<Item = (usize, usize)> + '_ {
    topology
        .paths
        .iter()
        .enumerate()
        .filter(|(_, spec)| !spec.background)
        .filter_map(|(path, spec)| spec.traffic_class.map(|class| (path, class)))
}

fn sequence_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
