//! Minimal report of non-neutral link sequences.
//!
//! A non-neutral sequence is redundant when its smaller, classified
//! subsequences cover all of its links and at least one of them is itself
//! non-neutral: the discrimination is then already attributed to fewer links.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::types::{LinkSequence, Neutrality, NeutralityVerdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionDecision {
    pub sequence: LinkSequence,
    pub neutral_subsequences: Vec<LinkSequence>,
    pub non_neutral_subsequences: Vec<LinkSequence>,
    pub neutral_union: LinkSequence,
    pub non_neutral_union: LinkSequence,
    pub complete_union: LinkSequence,
    pub keep: bool,
}

/// Decides, for every non-neutral sequence, whether it stays in the report.
pub fn reduce(verdicts: &BTreeMap<LinkSequence, NeutralityVerdict>) -> Vec<ReductionDecision> {
    let labelled = |wanted: Neutrality| {
        verdicts
            .iter()
            .filter(move |(_, verdict)| verdict.neutrality == wanted)
            .map(|(sequence, _)| sequence)
    };

    labelled(Neutrality::NonNeutral)
        .map(|sequence| {
            let proper_subsets = |wanted| -> Vec<LinkSequence> {
                labelled(wanted)
                    .filter(|other| other.len() < sequence.len() && other.is_subset(sequence))
                    .cloned()
                    .collect()
            };
            let neutral_subsequences = proper_subsets(Neutrality::Neutral);
            let non_neutral_subsequences = proper_subsets(Neutrality::NonNeutral);
            let neutral_union = union(&neutral_subsequences);
            let non_neutral_union = union(&non_neutral_subsequences);
            let complete_union: LinkSequence = neutral_union.union(&non_neutral_union).copied().collect();
            let keep = complete_union != *sequence || non_neutral_union.is_empty();
            if !keep {
                log::debug!("Sequence {:?} is explained by its non-neutral subsequences", sequence);
            }
            ReductionDecision {
                sequence: sequence.clone(),
                neutral_subsequences,
                non_neutral_subsequences,
                neutral_union,
                non_neutral_union,
                complete_union,
                keep,
            }
        })
        .collect()
}

fn union(sequences: &[LinkSequence]) -> LinkSequence {
    sequences.iter().flatten().copied().collect()
}

/// Sequences that survive the reduction.
pub fn kept(decisions: &[ReductionDecision]) -> impl Iterator<Item = &LinkSequence> {
    decisions.iter().filter(|d| d.keep).map(|d| &d.sequence)
}

/// Mean number of links per kept sequence.
pub fn granularity(decisions: &[ReductionDecision]) -> Option<f64> {
    let lengths: Vec<usize> = kept(decisions).map(BTreeSet::len).collect();
    (!lengths.is_empty()).then(|| lengths.iter().sum::<usize>() as f64 / lengths.len() as f64)
}

/// Fraction of the truly non-neutral links that appear in a kept sequence.
pub fn coverage(decisions: &[ReductionDecision], non_neutral_links: &BTreeSet<usize>) -> Option<f64> {
    if non_neutral_links.is_empty() {
        return None;
    }
    let reported: BTreeSet<usize> = kept(decisions).flatten().copied().collect();
    let covered = non_neutral_links.intersection(&reported).count();
    Some(covered as f64 / non_neutral_links.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::Strength;

    fn verdict(neutrality: Neutrality) -> NeutralityVerdict {
        NeutralityVerdict {
            neutrality,
            strength: Some(Strength::Strong),
            ..NeutralityVerdict::undecidable()
        }
    }

    fn seq(links: &[usize]) -> LinkSequence {
        links.iter().copied().collect()
    }

    #[test]
    fn test_explained_sequence_is_dropped() {
        let verdicts: BTreeMap<_, _> = [
            (seq(&[1]), verdict(Neutrality::NonNeutral)),
            (seq(&[2]), verdict(Neutrality::Neutral)),
            (seq(&[1, 2]), verdict(Neutrality::NonNeutral)),
        ]
        .into_iter()
        .collect();
        let decisions = reduce(&verdicts);
        assert_eq!(decisions.len(), 2);

        let pair = decisions.iter().find(|d| d.sequence == seq(&[1, 2])).unwrap();
        assert!(!pair.keep);
        assert_eq!(pair.non_neutral_union, seq(&[1]));
        assert_eq!(pair.complete_union, seq(&[1, 2]));

        assert_eq!(kept(&decisions).collect::<Vec<_>>(), vec![&seq(&[1])]);
        assert_eq!(granularity(&decisions), Some(1.0));
        assert_eq!(coverage(&decisions, &seq(&[1, 2])), Some(0.5));
    }

    #[test]
    fn test_partially_covered_sequence_is_kept() {
        let verdicts: BTreeMap<_, _> = [
            (seq(&[1]), verdict(Neutrality::NonNeutral)),
            (seq(&[1, 2]), verdict(Neutrality::NonNeutral)),
        ]
        .into_iter()
        .collect();
        let decisions = reduce(&verdicts);
        assert!(decisions.iter().all(|d| d.keep));
        assert_eq!(granularity(&decisions), Some(1.5));
    }

    #[test]
    fn test_neutral_only_subsequences_keep_sequence() {
        let verdicts: BTreeMap<_, _> = [
            (seq(&[1]), verdict(Neutrality::Neutral)),
            (seq(&[2]), verdict(Neutrality::Neutral)),
            (seq(&[3]), verdict(Neutrality::Undecidable)),
            (seq(&[1, 2]), verdict(Neutrality::NonNeutral)),
        ]
        .into_iter()
        .collect();
        let decisions = reduce(&verdicts);
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].keep);
        assert!(decisions[0].non_neutral_union.is_empty());
    }

    #[test]
    fn test_metrics_on_empty_report() {
        assert_eq!(granularity(&[]), None);
        assert_eq!(coverage(&[], &BTreeSet::new()), None);
        assert_eq!(coverage(&[], &seq(&[4])), Some(0.0));
    }
}
