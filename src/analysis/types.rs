//! Core data types for neutrality inference.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Set of link indices shared by two or more compared paths.
pub type LinkSequence = BTreeSet<usize>;

/// Traffic-volume bin and traffic class of a probability sample.
///
/// Classes are zero-based internally and displayed one-based (`b1c1`, `b1c2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassBin {
    pub bin: u64,
    pub class: usize,
}

impl ClassBin {
    pub fn new(bin: u64, class: usize) -> Self {
        Self { bin, class }
    }
}

impl fmt::Display for ClassBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}c{}", self.bin, self.class + 1)
    }
}

/// Congestion probabilities grouped by class and volume bin.
pub type ClassBinProbabilities = BTreeMap<ClassBin, Vec<f64>>;

/// Traffic-volume bin for an average per-interval packet count.
pub fn volume_bin(avg_in_flight: f64, bin_size: f64) -> u64 {
    1 + (avg_in_flight / bin_size).floor() as u64
}

/// Detected neutrality of a link or link sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Neutrality {
    Neutral,
    NonNeutral,
    Undecidable,
}

impl fmt::Display for Neutrality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Neutrality::Neutral => write!(f, "neutral"),
            Neutrality::NonNeutral => write!(f, "non-neutral"),
            Neutrality::Undecidable => write!(f, "undecidable"),
        }
    }
}

/// Whether every clue agreed with the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Strong,
    Weak,
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strength::Strong => write!(f, "strong"),
            Strength::Weak => write!(f, "weak"),
        }
    }
}

/// Verdict scored against simulator ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionOutcome {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
    Undecidable,
}

impl DetectionOutcome {
    /// Non-neutral is the positive class.
    pub fn score(detected: Neutrality, actually_neutral: bool) -> Self {
        match (detected, actually_neutral) {
            (Neutrality::Undecidable, _) => DetectionOutcome::Undecidable,
            (Neutrality::NonNeutral, false) => DetectionOutcome::TruePositive,
            (Neutrality::NonNeutral, true) => DetectionOutcome::FalsePositive,
            (Neutrality::Neutral, true) => DetectionOutcome::TrueNegative,
            (Neutrality::Neutral, false) => DetectionOutcome::FalseNegative,
        }
    }
}

impl fmt::Display for DetectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DetectionOutcome::TruePositive => "true positive",
            DetectionOutcome::FalsePositive => "false positive",
            DetectionOutcome::TrueNegative => "true negative",
            DetectionOutcome::FalseNegative => "false negative",
            DetectionOutcome::Undecidable => "undecidable",
        };
        f.write_str(text)
    }
}

/// Classification result for one link or link sequence.
///
/// Clues are the normalized gaps that supported each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeutralityVerdict {
    pub neutrality: Neutrality,
    pub strength: Option<Strength>,
    pub neutral_clues: Vec<f64>,
    pub non_neutral_clues: Vec<f64>,
    /// Only filled in when ground truth is available.
    pub outcome: Option<DetectionOutcome>,
}

impl NeutralityVerdict {
    pub fn undecidable() -> Self {
        Self {
            neutrality: Neutrality::Undecidable,
            strength: None,
            neutral_clues: Vec::new(),
            non_neutral_clues: Vec::new(),
            outcome: None,
        }
    }

    pub fn score(&mut self, actually_neutral: bool) {
        self.outcome = Some(DetectionOutcome::score(self.neutrality, actually_neutral));
    }

    /// Label with strength, e.g. `non-neutral (weak)`.
    pub fn label(&self) -> String {
        match self.strength {
            Some(strength) => format!("{} ({})", self.neutrality, strength),
            None => self.neutrality.to_string(),
        }
    }
}

/// Detection counts over decided entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    pub total_neutral: usize,
    pub total_non_neutral: usize,
}

impl ConfusionMatrix {
    /// Adds one scored entity. Undecidable entities are not counted.
    pub fn record(&mut self, outcome: DetectionOutcome) {
        match outcome {
            DetectionOutcome::Undecidable => return,
            DetectionOutcome::TruePositive => self.true_positives += 1,
            DetectionOutcome::FalsePositive => self.false_positives += 1,
            DetectionOutcome::TrueNegative => self.true_negatives += 1,
            DetectionOutcome::FalseNegative => self.false_negatives += 1,
        }
        match outcome {
            DetectionOutcome::TruePositive | DetectionOutcome::FalseNegative => {
                self.total_non_neutral += 1
            }
            _ => self.total_neutral += 1,
        }
    }

    pub fn decided(&self) -> usize {
        self.total_neutral + self.total_non_neutral
    }

    pub fn true_positive_rate(&self) -> Option<f64> {
        ratio(self.true_positives, self.total_non_neutral)
    }

    pub fn false_negative_rate(&self) -> Option<f64> {
        ratio(self.false_negatives, self.total_non_neutral)
    }

    pub fn true_negative_rate(&self) -> Option<f64> {
        ratio(self.true_negatives, self.total_neutral)
    }

    pub fn false_positive_rate(&self) -> Option<f64> {
        ratio(self.false_positives, self.total_neutral)
    }
}

impl FromIterator<DetectionOutcome> for ConfusionMatrix {
    fn from_iter<I: IntoIterator<Item = DetectionOutcome>>(iter: I) -> Self {
        let mut matrix = ConfusionMatrix::default();
        for outcome in iter {
            matrix.record(outcome);
        }
        matrix
    }
}

fn ratio(count: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| count as f64 / total as f64)
}

/// Formats a link sequence one-based, e.g. `{1, 3}`.
pub fn format_links<'a>(links: impl IntoIterator<Item = &'a usize>) -> String {
    let parts: Vec<String> = links.into_iter().map(|l| (l + 1).to_string()).collect();
    format!("{{{}}}", parts.join(", "))
}
