//! Measurements of every link, path and routed (link, path) pair for one time bucket.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::ops::AddAssign;

use super::codec::{self, FormatError};
use super::link::LinkMeasurement;

const SNAPSHOT_VERSION: i32 = 1;

/// Key of a routed (link, path) pair.
pub type EdgePath = (usize, usize);

/// One interval's worth of counters.
///
/// The set of `edge_paths` keys is fixed when the snapshot is created from
/// the routing matrix and is never extended afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSnapshot {
    pub edges: Vec<LinkMeasurement>,
    pub paths: Vec<LinkMeasurement>,
    pub edge_paths: BTreeMap<EdgePath, LinkMeasurement>,
}

impl IntervalSnapshot {
    /// Creates a zeroed snapshot. `routing` lists the `(edge, path)` pairs
    /// where the path crosses the edge.
    pub fn new(num_edges: usize, num_paths: usize, routing: &[EdgePath]) -> Self {
        Self {
            edges: vec![LinkMeasurement::new(); num_edges],
            paths: vec![LinkMeasurement::new(); num_paths],
            edge_paths: routing
                .iter()
                .map(|&key| (key, LinkMeasurement::new()))
                .collect(),
        }
    }

    pub fn clear(&mut self) {
        self.edges.iter_mut().for_each(LinkMeasurement::clear);
        self.paths.iter_mut().for_each(LinkMeasurement::clear);
        self.edge_paths.values_mut().for_each(LinkMeasurement::clear);
    }

    pub fn edge_path(&self, edge: usize, path: usize) -> Option<&LinkMeasurement> {
        self.edge_paths.get(&(edge, path))
    }

    /// True if any edge or path saw a packet in flight.
    pub fn has_traffic(&self) -> bool {
        self.edges.iter().any(|m| m.in_flight > 0) || self.paths.iter().any(|m| m.in_flight > 0)
    }

    /// Fails unless the snapshot holds exactly `num_edges` edges and
    /// `num_paths` paths, and every (edge, path) key lies within them.
    pub(crate) fn check_dimensions(&self, num_edges: usize, num_paths: usize) -> Result<(), FormatError> {
        let invalid = |value: usize| FormatError::Invalid {
            what: "snapshot dimensions",
            value: i64::try_from(value).unwrap_or(i64::MAX),
        };
        if self.edges.len() != num_edges {
            return Err(invalid(self.edges.len()));
        }
        if self.paths.len() != num_paths {
            return Err(invalid(self.paths.len()));
        }
        if let Some(&(edge, path)) = self
            .edge_paths
            .keys()
            .find(|&&(edge, path)| edge >= num_edges || path >= num_paths)
        {
            return Err(invalid(edge.max(path)));
        }
        Ok(())
    }

    pub(crate) fn encode(&self, w: &mut impl Write) -> Result<(), FormatError> {
        codec::write_i32(w, SNAPSHOT_VERSION)?;
        codec::write_len(w, self.edges.len())?;
        for m in &self.edges {
            m.encode(w)?;
        }
        codec::write_len(w, self.paths.len())?;
        for m in &self.paths {
            m.encode(w)?;
        }
        codec::write_len(w, self.edge_paths.len())?;
        for (&(edge, path), m) in &self.edge_paths {
            codec::write_index(w, edge)?;
            codec::write_index(w, path)?;
            m.encode(w)?;
        }
        Ok(())
    }

    pub(crate) fn decode(r: &mut impl Read) -> Result<Self, FormatError> {
        let version = codec::read_i32(r)?;
        if version != SNAPSHOT_VERSION {
            return Err(FormatError::UnsupportedVersion {
                record: "interval snapshot",
                version,
            });
        }
        let edges = decode_list(r)?;
        let paths = decode_list(r)?;
        let count = codec::read_len(r)?;
        let mut edge_paths = BTreeMap::new();
        for _ in 0..count {
            let edge = codec::read_index(r, "edge index")?;
            let path = codec::read_index(r, "path index")?;
            edge_paths.insert((edge, path), LinkMeasurement::decode(r)?);
        }
        Ok(Self {
            edges,
            paths,
            edge_paths,
        })
    }
}

fn decode_list(r: &mut impl Read) -> Result<Vec<LinkMeasurement>, FormatError> {
    let count = codec::read_len(r)?;
    let mut list = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        list.push(LinkMeasurement::decode(r)?);
    }
    Ok(list)
}

/// Adds counters element-wise. Both snapshots must come from the same routing matrix;
/// keys missing on either side are skipped.
impl AddAssign<&IntervalSnapshot> for IntervalSnapshot {
    fn add_assign(&mut self, other: &IntervalSnapshot) {
        for (mine, theirs) in self.edges.iter_mut().zip(&other.edges) {
            *mine += theirs;
        }
        for (mine, theirs) in self.paths.iter_mut().zip(&other.paths) {
            *mine += theirs;
        }
        for (key, mine) in self.edge_paths.iter_mut() {
            if let Some(theirs) = other.edge_paths.get(key) {
                *mine += theirs;
            }
        }
    }
}
