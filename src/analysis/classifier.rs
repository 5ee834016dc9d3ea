//! Neutrality classification from per-class congestion probabilities.
//!
//! A link or link sequence is compared bin by bin: within each traffic-volume
//! bin holding probabilities for both classes, the normalized gap between the
//! classes is the evidence. Gaps are either compared against a fixed threshold
//! per entity, or pooled across all entities and split into a low and a high
//! group by repeated 1-D k-means.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::stats::{kmeans_consensus, relative_gap};
use super::types::{ClassBin, ClassBinProbabilities, Neutrality, NeutralityVerdict, Strength};
use crate::config::ClassifierConfig;

/// How verdicts are derived from gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Each entity on its own, against `gap_threshold`.
    GapThreshold,
    /// All entities together, by k-means over the pooled gaps.
    GlobalClustering,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::GapThreshold => write!(f, "gap threshold"),
            Strategy::GlobalClustering => write!(f, "global clustering"),
        }
    }
}

/// Normalized class gap of every volume bin that has data for both classes.
pub fn bin_gaps(probabilities: &ClassBinProbabilities) -> BTreeMap<u64, f64> {
    let mut gaps = BTreeMap::new();
    for (key, class1) in probabilities {
        if key.class != 0 {
            continue;
        }
        let Some(class2) = probabilities.get(&ClassBin::new(key.bin, 1)) else {
            continue;
        };
        if let Some(gap) = relative_gap(class1, class2) {
            gaps.insert(key.bin, gap);
        }
    }
    gaps
}

/// Majority verdict from per-bin clues; ties go to non-neutral.
fn verdict_from_clues(neutral_clues: Vec<f64>, non_neutral_clues: Vec<f64>) -> NeutralityVerdict {
    if neutral_clues.is_empty() && non_neutral_clues.is_empty() {
        return NeutralityVerdict::undecidable();
    }
    let neutrality = if non_neutral_clues.len() >= neutral_clues.len() {
        Neutrality::NonNeutral
    } else {
        Neutrality::Neutral
    };
    let strength = if neutral_clues.is_empty() || non_neutral_clues.is_empty() {
        Strength::Strong
    } else {
        Strength::Weak
    };
    NeutralityVerdict {
        neutrality,
        strength: Some(strength),
        neutral_clues,
        non_neutral_clues,
        outcome: None,
    }
}

pub struct NeutralityClassifier<'a> {
    config: &'a ClassifierConfig,
}

impl<'a> NeutralityClassifier<'a> {
    pub fn new(config: &'a ClassifierConfig) -> Self {
        Self { config }
    }

    /// Neutral when every gap is below the threshold, non-neutral when every
    /// gap reaches it, majority otherwise.
    pub fn classify_by_threshold(&self, probabilities: &ClassBinProbabilities) -> NeutralityVerdict {
        let (non_neutral, neutral): (Vec<f64>, Vec<f64>) = bin_gaps(probabilities)
            .into_values()
            .partition(|&gap| gap >= self.config.gap_threshold);
        verdict_from_clues(neutral, non_neutral)
    }

    /// Clusters the gaps of all entities together.
    ///
    /// Entities without a comparable bin are undecidable. When fewer than
    /// `min_clustering_points` gaps exist overall, every entity is either
    /// classified by threshold (if configured) or left undecidable.
    pub fn classify_by_clustering<K, R>(
        &self,
        entities: &BTreeMap<K, ClassBinProbabilities>,
        rng: &mut R,
    ) -> BTreeMap<K, NeutralityVerdict>
    where
        K: Ord + Clone,
        R: Rng + ?Sized,
    {
        let gaps: Vec<(&K, f64)> = entities
            .iter()
            .flat_map(|(key, probabilities)| {
                bin_gaps(probabilities).into_values().map(move |gap| (key, gap))
            })
            .collect();

        if gaps.len() < self.config.min_clustering_points.max(1) {
            if self.config.fallback_to_gap_threshold {
                log::warn!(
                    "Only {} gaps to cluster, falling back to the gap threshold",
                    gaps.len()
                );
                return entities
                    .iter()
                    .map(|(key, probabilities)| (key.clone(), self.classify_by_threshold(probabilities)))
                    .collect();
            }
            log::warn!(
                "Only {} gaps to cluster, all {} entities are undecidable",
                gaps.len(),
                entities.len()
            );
            return entities
                .keys()
                .map(|key| (key.clone(), NeutralityVerdict::undecidable()))
                .collect();
        }

        let points: Vec<f64> = gaps.iter().map(|&(_, gap)| gap).collect();
        let (consensus, _) = kmeans_consensus(
            &points,
            self.config.clustering_runs,
            self.config.kmeans_max_iterations,
            rng,
        );
        let non_neutral_cluster = high_cluster(&points, &consensus);
        log::info!(
            "Clustered {} gaps: {} in the non-neutral group",
            points.len(),
            consensus.iter().filter(|&&c| c == non_neutral_cluster).count()
        );

        let mut clues: BTreeMap<&K, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for (&(key, gap), &cluster) in gaps.iter().zip(&consensus) {
            let (neutral, non_neutral) = clues.entry(key).or_default();
            if cluster == non_neutral_cluster {
                non_neutral.push(gap);
            } else {
                neutral.push(gap);
            }
        }

        entities
            .keys()
            .map(|key| {
                let verdict = match clues.remove(key) {
                    Some((neutral, non_neutral)) => verdict_from_clues(neutral, non_neutral),
                    None => NeutralityVerdict::undecidable(),
                };
                (key.clone(), verdict)
            })
            .collect()
    }

    pub fn classify<K, R>(
        &self,
        strategy: Strategy,
        entities: &BTreeMap<K, ClassBinProbabilities>,
        rng: &mut R,
    ) -> BTreeMap<K, NeutralityVerdict>
    where
        K: Ord + Clone,
        R: Rng + ?Sized,
    {
        match strategy {
            Strategy::GapThreshold => entities
                .iter()
                .map(|(key, probabilities)| (key.clone(), self.classify_by_threshold(probabilities)))
                .collect(),
            Strategy::GlobalClustering => self.classify_by_clustering(entities, rng),
        }
    }
}

/// Consensus label whose points have the larger mean gap. Label 1 when only
/// one label occurs, since k-means orders its centroids.
fn high_cluster(points: &[f64], consensus: &[usize]) -> usize {
    let mean_of = |label: usize| {
        let members: Vec<f64> = points
            .iter()
            .zip(consensus)
            .filter(|&(_, &c)| c == label)
            .map(|(&p, _)| p)
            .collect();
        (!members.is_empty()).then(|| members.iter().sum::<f64>() / members.len() as f64)
    };
    match (mean_of(0), mean_of(1)) {
        (Some(low), Some(high)) if low > high => 0,
        _ => 1,
    }
}
