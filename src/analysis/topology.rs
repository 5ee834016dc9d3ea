//! Routing and ground-truth description of an emulated topology.
//!
//! The topology is produced by the experiment tooling and read here from YAML
//! or JSON. It supplies the routing matrix used to size an [`ExperimentLog`],
//! the traffic class of each path, and (for validation only) which links were
//! configured to discriminate traffic.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::types::LinkSequence;
use crate::measurement::{EdgePath, ExperimentLog};

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Failed to open topology {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse topology {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Path {path} is empty")]
    EmptyPath { path: usize },

    #[error("Path {path} uses link {link}, but the topology has {num_links} links")]
    LinkOutOfRange {
        path: usize,
        link: usize,
        num_links: usize,
    },

    #[error("Path {path} crosses link {link} more than once")]
    RepeatedLink { path: usize, link: usize },

    #[error("Non-neutral link {link} is outside the {num_links} links of the topology")]
    GroundTruthOutOfRange { link: usize, num_links: usize },

    #[error("Topology has {expected} {what}, measurements have {found}")]
    Mismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// One end-to-end route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSpec {
    /// Links in forwarding order.
    pub links: Vec<usize>,
    /// Zero-based traffic class; `None` for unclassified traffic.
    #[serde(default)]
    pub traffic_class: Option<usize>,
    /// Background paths carry cross traffic and are never compared.
    #[serde(default)]
    pub background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub num_links: usize,
    pub paths: Vec<PathSpec>,
    #[serde(default)]
    pub non_neutral_links: BTreeSet<usize>,
}

/// Links shared by at least one pair of compared paths, with the pairs that share them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    pub links: LinkSequence,
    /// Shared links in the forwarding order of the first pair's lower-indexed path.
    pub ordered_links: Vec<usize>,
    pub path_pairs: BTreeSet<(usize, usize)>,
    pub paths: BTreeSet<usize>,
}

impl Topology {
    /// Loads a topology from `.json`, or YAML for any other extension.
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        log::info!("Loading topology from: {}", path.display());
        let file = File::open(path).map_err(|source| TopologyError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let topology: Topology = if is_json {
            serde_json::from_reader(file).map_err(|e| TopologyError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_reader(file).map_err(|e| TopologyError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };
        topology.validate()?;
        Ok(topology)
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        for (index, path) in self.paths.iter().enumerate() {
            if path.links.is_empty() {
                return Err(TopologyError::EmptyPath { path: index });
            }
            let mut seen = BTreeSet::new();
            for &link in &path.links {
                if link >= self.num_links {
                    return Err(TopologyError::LinkOutOfRange {
                        path: index,
                        link,
                        num_links: self.num_links,
                    });
                }
                if !seen.insert(link) {
                    return Err(TopologyError::RepeatedLink { path: index, link });
                }
            }
        }
        if let Some(&link) = self.non_neutral_links.iter().find(|&&l| l >= self.num_links) {
            return Err(TopologyError::GroundTruthOutOfRange {
                link,
                num_links: self.num_links,
            });
        }
        Ok(())
    }

    /// Fails if the log was recorded for a topology of different dimensions.
    pub fn check_log(&self, log: &ExperimentLog) -> Result<(), TopologyError> {
        if log.num_edges != self.num_links {
            return Err(TopologyError::Mismatch {
                what: "links",
                expected: self.num_links,
                found: log.num_edges,
            });
        }
        if log.num_paths != self.paths.len() {
            return Err(TopologyError::Mismatch {
                what: "paths",
                expected: self.paths.len(),
                found: log.num_paths,
            });
        }
        Ok(())
    }

    /// `(link, path)` pairs where the path crosses the link, ordered by key.
    pub fn routing_pairs(&self) -> Vec<EdgePath> {
        let pairs: BTreeSet<EdgePath> = self
            .paths
            .iter()
            .enumerate()
            .flat_map(|(p, path)| path.links.iter().map(move |&e| (e, p)))
            .collect();
        pairs.into_iter().collect()
    }

    pub fn is_link_neutral(&self, link: usize) -> bool {
        !self.non_neutral_links.contains(&link)
    }

    /// A sequence is neutral only if all of its links are.
    pub fn is_sequence_neutral(&self, sequence: &LinkSequence) -> bool {
        sequence.iter().all(|&link| self.is_link_neutral(link))
    }

    /// Groups every pair of non-background paths by the set of links they share.
    pub fn link_sequences(&self) -> BTreeMap<LinkSequence, SequenceInfo> {
        let mut sequences: BTreeMap<LinkSequence, SequenceInfo> = BTreeMap::new();
        let sets: Vec<BTreeSet<usize>> = self
            .paths
            .iter()
            .map(|path| path.links.iter().copied().collect())
            .collect();

        for (p1, path1) in self.paths.iter().enumerate() {
            if path1.background {
                continue;
            }
            for (p2, path2) in self.paths.iter().enumerate().skip(p1 + 1) {
                if path2.background {
                    continue;
                }
                let common: LinkSequence = sets[p1].intersection(&sets[p2]).copied().collect();
                if common.is_empty() {
                    continue;
                }
                let info = sequences.entry(common.clone()).or_insert_with(|| SequenceInfo {
                    ordered_links: path1
                        .links
                        .iter()
                        .copied()
                        .filter(|link| common.contains(link))
                        .collect(),
                    links: common,
                    path_pairs: BTreeSet::new(),
                    paths: BTreeSet::new(),
                });
                info.path_pairs.insert((p1, p2));
                info.paths.insert(p1);
                info.paths.insert(p2);
            }
        }
        sequences
    }
}
