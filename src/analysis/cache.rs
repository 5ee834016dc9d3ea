//! On-disk cache of link-sequence estimates.
//!
//! Sequence estimation dominates analysis time, while classification is cheap
//! and often re-run with other settings. Estimates are stored as
//! zstd-compressed bincode next to a fingerprint of everything they depend on.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::congestion::SequenceEstimate;
use super::topology::Topology;
use super::types::LinkSequence;
use crate::config::EstimatorConfig;
use crate::measurement::ExperimentLog;

const CACHE_VERSION: u32 = 2;
const COMPRESSION_LEVEL: i32 = 3;

pub type SequenceEstimates = BTreeMap<LinkSequence, SequenceEstimate>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache encoding error on {}: {source}", path.display())]
    Encoding {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("Cache {} was built from different inputs", path.display())]
    FingerprintMismatch { path: PathBuf },
}

/// Inputs that determine the sequence estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFingerprint {
    pub version: u32,
    pub ts_start: u64,
    pub interval_size: u64,
    pub num_intervals: usize,
    pub num_edges: usize,
    pub num_paths: usize,
    pub total_in_flight: u64,
    pub total_dropped: u64,
    pub routing: Vec<(usize, usize)>,
    pub traffic_classes: Vec<Option<usize>>,
    pub background: Vec<bool>,
    pub loss_threshold: f64,
    pub bin_size: f64,
    pub min_packets: u64,
    pub warmup_nanos: u64,
    pub cooldown_nanos: u64,
    pub sampling_iterations: usize,
    pub seed: u64,
}

impl CacheFingerprint {
    pub fn new(log: &ExperimentLog, topology: &Topology, config: &EstimatorConfig) -> Self {
        Self {
            version: CACHE_VERSION,
            ts_start: log.ts_start,
            interval_size: log.interval_size,
            num_intervals: log.num_intervals(),
            num_edges: log.num_edges,
            num_paths: log.num_paths,
            total_in_flight: log.global.paths.iter().map(|m| m.in_flight).sum(),
            total_dropped: log.global.paths.iter().map(|m| m.dropped).sum(),
            routing: topology.routing_pairs(),
            traffic_classes: topology.paths.iter().map(|p| p.traffic_class).collect(),
            background: topology.paths.iter().map(|p| p.background).collect(),
            loss_threshold: config.loss_threshold,
            bin_size: config.bin_size,
            min_packets: config.min_packets,
            warmup_nanos: config.warmup_nanos(),
            cooldown_nanos: config.cooldown_nanos(),
            sampling_iterations: config.sampling_iterations,
            seed: config.seed,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    fingerprint: CacheFingerprint,
    estimates: SequenceEstimates,
}

/// Writes the estimates and their fingerprint to `path`.
pub fn store(
    path: &Path,
    fingerprint: &CacheFingerprint,
    estimates: &SequenceEstimates,
) -> Result<(), CacheError> {
    let io_error = |source: std::io::Error| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_error)?;
    let mut encoder = zstd::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL).map_err(io_error)?;
    bincode::serialize_into(
        &mut encoder,
        &CacheFile {
            fingerprint: fingerprint.clone(),
            estimates: estimates.clone(),
        },
    )
    .map_err(|source| CacheError::Encoding {
        path: path.to_path_buf(),
        source,
    })?;
    encoder.finish().map_err(io_error)?.flush().map_err(io_error)?;
    log::info!("Cached {} sequence estimates in {}", estimates.len(), path.display());
    Ok(())
}

/// Reads cached estimates, failing if they were built from other inputs.
pub fn read(path: &Path, fingerprint: &CacheFingerprint) -> Result<SequenceEstimates, CacheError> {
    let file = File::open(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let decoder = zstd::Decoder::new(file).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let cached: CacheFile = bincode::deserialize_from(decoder).map_err(|source| CacheError::Encoding {
        path: path.to_path_buf(),
        source,
    })?;
    if cached.fingerprint != *fingerprint {
        return Err(CacheError::FingerprintMismatch {
            path: path.to_path_buf(),
        });
    }
    Ok(cached.estimates)
}

/// Like [`read`], but a missing, stale or unreadable cache is a miss.
pub fn load(path: &Path, fingerprint: &CacheFingerprint) -> Option<SequenceEstimates> {
    if !path.exists() {
        return None;
    }
    match read(path, fingerprint) {
        Ok(estimates) => {
            log::info!("Loaded {} sequence estimates from {}", estimates.len(), path.display());
            Some(estimates)
        }
        Err(e) => {
            log::warn!("Ignoring estimate cache: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::topology::PathSpec;
    use crate::analysis::types::{ClassBin, ClassBinProbabilities};

    fn fingerprint(seed: u64) -> CacheFingerprint {
        let topology = Topology {
            num_links: 1,
            paths: Vec::new(),
            non_neutral_links: Default::default(),
        };
        let config = EstimatorConfig {
            seed,
            ..Default::default()
        };
        CacheFingerprint::new(&ExperimentLog::default(), &topology, &config)
    }

    fn estimates() -> SequenceEstimates {
        let links: LinkSequence = [0, 3].into_iter().collect();
        let mut estimated = ClassBinProbabilities::new();
        estimated.insert(ClassBin::new(1, 0), vec![0.25, 0.5]);
        let estimate = SequenceEstimate {
            links: links.clone(),
            ordered_links: vec![3, 0],
            estimated: estimated.clone(),
            truth: estimated,
            has_class1_pair: true,
            has_class2_pair: false,
            valid_intervals: 12,
        };
        [(links, estimate)].into_iter().collect()
    }

    #[test]
    fn test_store_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimates.bin.zst");
        store(&path, &fingerprint(1), &estimates()).unwrap();
        assert_eq!(read(&path, &fingerprint(1)).unwrap(), estimates());
        assert_eq!(load(&path, &fingerprint(1)), Some(estimates()));
    }

    #[test]
    fn test_background_paths_change_the_fingerprint() {
        let path = |links: Vec<usize>| PathSpec {
            links,
            traffic_class: Some(0),
            background: false,
        };
        let mut topology = Topology {
            num_links: 2,
            paths: vec![path(vec![0, 1]), path(vec![0])],
            non_neutral_links: Default::default(),
        };
        let log = ExperimentLog::default();
        let config = EstimatorConfig::default();
        let before = CacheFingerprint::new(&log, &topology, &config);
        assert_eq!(topology.link_sequences().len(), 1);

        topology.paths[1].background = true;
        let after = CacheFingerprint::new(&log, &topology, &config);
        assert!(topology.link_sequences().is_empty());
        assert_ne!(before, after);
    }

    #[test]
    fn test_stale_cache_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimates.bin.zst");
        store(&path, &fingerprint(1), &estimates()).unwrap();
        assert!(matches!(
            read(&path, &fingerprint(2)),
            Err(CacheError::FingerprintMismatch { .. })
        ));
        assert_eq!(load(&path, &fingerprint(2)), None);
        assert_eq!(load(&dir.path().join("missing"), &fingerprint(1)), None);
    }
}
