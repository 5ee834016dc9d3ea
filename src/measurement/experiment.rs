//! Interval-indexed measurement store for one experiment.
//!
//! An [`ExperimentLog`] owns a pre-sized window of [`IntervalSnapshot`]s plus one
//! global accumulator. Packets are counted into every interval their flight
//! time overlaps, using a closed start and an open end: a packet in flight over
//! `[ts_in, ts_out)` touches intervals
//! `timestamp_to_interval(ts_in) ..= timestamp_to_open_interval(ts_out)`.
//!
//! Timestamps outside the window are dropped silently; the whole counting call
//! becomes a no-op so the global snapshot never disagrees with the intervals.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use super::codec::{self, FormatError};
use super::snapshot::{EdgePath, IntervalSnapshot};

const LOG_VERSION: i32 = 2;
const MIN_INTERVALS: u64 = 100;
const MAX_INTERVALS: u64 = 10_000;

/// Errors raised while building, saving or loading an experiment log.
#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("Interval size must be positive")]
    InvalidIntervalSize,

    #[error("Routing pair (edge {edge}, path {path}) is outside {num_edges} edges / {num_paths} paths")]
    RoutingOutOfRange {
        edge: usize,
        path: usize,
        num_edges: usize,
        num_paths: usize,
    },

    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write measurements to {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("Failed to read measurements from {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
}

/// Dimensions of a new log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogParams {
    /// Experiment start, in nanoseconds.
    pub ts_start: u64,
    /// Expected experiment duration, in nanoseconds. Sizes the window.
    pub expected_duration: u64,
    /// Interval length, in nanoseconds.
    pub interval_size: u64,
    pub num_edges: usize,
    pub num_paths: usize,
    /// Packets smaller than this (in bytes) are not counted.
    pub packet_size_threshold: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentLog {
    pub intervals: Vec<IntervalSnapshot>,
    pub global: IntervalSnapshot,
    pub ts_start: u64,
    pub ts_last: u64,
    pub interval_size: u64,
    pub num_edges: usize,
    pub num_paths: usize,
    pub packet_size_threshold: u32,
}

impl ExperimentLog {
    /// Creates an empty log sized for twice the expected duration (plus ten
    /// intervals of slack), clamped to 100..=10000 intervals.
    pub fn new(params: LogParams, routing: &[EdgePath]) -> Result<Self, MeasurementError> {
        if params.interval_size == 0 {
            return Err(MeasurementError::InvalidIntervalSize);
        }
        if let Some(&(edge, path)) = routing
            .iter()
            .find(|&&(edge, path)| edge >= params.num_edges || path >= params.num_paths)
        {
            return Err(MeasurementError::RoutingOutOfRange {
                edge,
                path,
                num_edges: params.num_edges,
                num_paths: params.num_paths,
            });
        }

        let wanted = params
            .expected_duration
            .saturating_mul(2)
            / params.interval_size
            + 10;
        let count = wanted.clamp(MIN_INTERVALS, MAX_INTERVALS) as usize;
        let template = IntervalSnapshot::new(params.num_edges, params.num_paths, routing);

        log::debug!(
            "Allocated {} intervals of {} ns for {} edges, {} paths, {} routed pairs",
            count,
            params.interval_size,
            params.num_edges,
            params.num_paths,
            routing.len()
        );

        Ok(Self {
            intervals: vec![template.clone(); count],
            global: template,
            ts_start: params.ts_start,
            ts_last: params.ts_start,
            interval_size: params.interval_size,
            num_edges: params.num_edges,
            num_paths: params.num_paths,
            packet_size_threshold: params.packet_size_threshold,
        })
    }

    pub fn num_intervals(&self) -> usize {
        self.intervals.len()
    }

    /// Index of the interval containing `ts`, or `None` outside the window.
    pub fn timestamp_to_interval(&self, ts: u64) -> Option<usize> {
        let offset = ts.checked_sub(self.ts_start)?;
        let index = usize::try_from(offset / self.interval_size).ok()?;
        (index < self.intervals.len()).then_some(index)
    }

    /// Last interval touched by a span ending (exclusively) at `ts`.
    ///
    /// Equals [`timestamp_to_interval`](Self::timestamp_to_interval) except on
    /// interval boundaries, where the interval that starts at `ts` is excluded.
    /// `ts_start` itself maps to interval 0.
    pub fn timestamp_to_open_interval(&self, ts: u64) -> Option<usize> {
        let offset = ts.checked_sub(self.ts_start)?;
        let mut index = offset / self.interval_size;
        if offset != 0 && offset % self.interval_size == 0 {
            index -= 1;
        }
        let index = usize::try_from(index).ok()?;
        (index < self.intervals.len()).then_some(index)
    }

    fn covered(&self, ts_in: u64, ts_out: u64) -> Option<RangeInclusive<usize>> {
        match (
            self.timestamp_to_interval(ts_in),
            self.timestamp_to_open_interval(ts_out),
        ) {
            (Some(first), Some(last)) if first <= last + 1 => Some(first..=last),
            _ => {
                log::trace!("Dropping span [{ts_in}, {ts_out}) outside the measurement window");
                None
            }
        }
    }

    fn accepts(&self, size: u32) -> bool {
        size >= self.packet_size_threshold
    }

    /// Counts `multiplier` packets in flight on `edge` over `[ts_in, ts_out)`.
    ///
    /// When `path` is given, the routed (edge, path) pair is counted as well.
    pub fn count_packet_in_flight_edge(
        &mut self,
        edge: usize,
        path: Option<usize>,
        ts_in: u64,
        ts_out: u64,
        size: u32,
        multiplier: u64,
    ) {
        if !self.accepts(size) {
            return;
        }
        let Some(range) = self.covered(ts_in, ts_out) else {
            return;
        };
        self.ts_last = self.ts_last.max(ts_in).max(ts_out);

        let snapshots = std::iter::once(&mut self.global).chain(&mut self.intervals[range]);
        for snapshot in snapshots {
            if let Some(m) = snapshot.edges.get_mut(edge) {
                m.in_flight += multiplier;
            }
            if let Some(m) = path.and_then(|p| snapshot.edge_paths.get_mut(&(edge, p))) {
                m.in_flight += multiplier;
            }
        }
    }

    /// Counts `multiplier` packets in flight end to end on `path` over `[ts_in, ts_out)`.
    pub fn count_packet_in_flight_path(
        &mut self,
        path: usize,
        ts_in: u64,
        ts_out: u64,
        size: u32,
        multiplier: u64,
    ) {
        if !self.accepts(size) {
            return;
        }
        let Some(range) = self.covered(ts_in, ts_out) else {
            return;
        };
        self.ts_last = self.ts_last.max(ts_in).max(ts_out);

        let snapshots = std::iter::once(&mut self.global).chain(&mut self.intervals[range]);
        for snapshot in snapshots {
            if let Some(m) = snapshot.paths.get_mut(path) {
                m.in_flight += multiplier;
            }
        }
    }

    /// Counts `multiplier` packets of `path` dropped on `edge`.
    ///
    /// The drop is charged to the edge, the path and the routed pair in every
    /// interval between `ts_in` and `ts_drop`.
    pub fn count_packet_dropped(
        &mut self,
        edge: usize,
        path: usize,
        ts_in: u64,
        ts_drop: u64,
        size: u32,
        multiplier: u64,
    ) {
        if !self.accepts(size) {
            return;
        }
        let Some(range) = self.covered(ts_in, ts_drop) else {
            return;
        };
        self.ts_last = self.ts_last.max(ts_drop);

        let snapshots = std::iter::once(&mut self.global).chain(&mut self.intervals[range]);
        for snapshot in snapshots {
            if let Some(m) = snapshot.edges.get_mut(edge) {
                m.dropped += multiplier;
            }
            if let Some(m) = snapshot.paths.get_mut(path) {
                m.dropped += multiplier;
            }
            if let Some(m) = snapshot.edge_paths.get_mut(&(edge, path)) {
                m.dropped += multiplier;
            }
        }
    }

    /// Appends `multiplier` events to `path`'s trace in every covered interval.
    pub fn record_packet_event_path(
        &mut self,
        path: usize,
        ts_in: u64,
        ts_out: u64,
        size: u32,
        multiplier: u64,
        forwarded: bool,
    ) {
        if !self.accepts(size) {
            return;
        }
        let Some(range) = self.covered(ts_in, ts_out) else {
            return;
        };
        self.ts_last = self.ts_last.max(ts_in).max(ts_out);

        for snapshot in &mut self.intervals[range] {
            if let Some(m) = snapshot.paths.get_mut(path) {
                m.events.push_repeated(forwarded, multiplier);
            }
        }
    }

    /// Appends `multiplier` events to `edge`'s trace (and the routed pair's,
    /// when `path` is given) in every covered interval.
    #[allow(clippy::too_many_arguments)]
    pub fn record_packet_event_edge(
        &mut self,
        edge: usize,
        path: Option<usize>,
        ts_in: u64,
        ts_out: u64,
        size: u32,
        multiplier: u64,
        forwarded: bool,
    ) {
        if !self.accepts(size) {
            return;
        }
        let Some(range) = self.covered(ts_in, ts_out) else {
            return;
        };
        self.ts_last = self.ts_last.max(ts_in).max(ts_out);

        for snapshot in &mut self.intervals[range] {
            if let Some(m) = snapshot.edges.get_mut(edge) {
                m.events.push_repeated(forwarded, multiplier);
            }
            if let Some(m) = path.and_then(|p| snapshot.edge_paths.get_mut(&(edge, p))) {
                m.events.push_repeated(forwarded, multiplier);
            }
        }
    }

    /// Drops every interval after the last one with traffic on any edge or path.
    ///
    /// Gaps before that interval are kept.
    pub fn trim(&mut self) {
        let keep = self
            .intervals
            .iter()
            .rposition(IntervalSnapshot::has_traffic)
            .map_or(0, |last| last + 1);
        if keep < self.intervals.len() {
            log::debug!(
                "Trimming {} trailing empty intervals",
                self.intervals.len() - keep
            );
            self.intervals.truncate(keep);
        }
    }

    /// Returns a copy with intervals at least `period` ns long.
    ///
    /// The period is rounded up to a multiple of the current interval size and
    /// each new interval sums a contiguous group of old ones (the last group may
    /// be partial). Periods not longer than the current interval size give an
    /// identical copy.
    pub fn resample(&self, period: u64) -> ExperimentLog {
        if period <= self.interval_size {
            return self.clone();
        }
        let factor = period.div_ceil(self.interval_size);
        let group = usize::try_from(factor).unwrap_or(usize::MAX);

        let intervals = self
            .intervals
            .chunks(group)
            .map(|chunk| {
                let mut merged = chunk[0].clone();
                merged.clear();
                for snapshot in chunk {
                    merged += snapshot;
                }
                merged
            })
            .collect();

        ExperimentLog {
            intervals,
            global: self.global.clone(),
            ts_start: self.ts_start,
            ts_last: self.ts_last,
            interval_size: factor * self.interval_size,
            num_edges: self.num_edges,
            num_paths: self.num_paths,
            packet_size_threshold: self.packet_size_threshold,
        }
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<(), FormatError> {
        codec::write_i32(w, LOG_VERSION)?;
        codec::write_len(w, self.intervals.len())?;
        for snapshot in &self.intervals {
            snapshot.encode(w)?;
        }
        self.global.encode(w)?;
        codec::write_u64(w, self.ts_start)?;
        codec::write_u64(w, self.ts_last)?;
        codec::write_u64(w, self.interval_size)?;
        codec::write_index(w, self.num_edges)?;
        codec::write_index(w, self.num_paths)?;
        let threshold = i32::try_from(self.packet_size_threshold).map_err(|_| FormatError::Invalid {
            what: "packet size threshold",
            value: self.packet_size_threshold as i64,
        })?;
        codec::write_i32(w, threshold)
    }

    /// Decodes a log without trimming it.
    pub fn read_from(r: &mut impl Read) -> Result<Self, FormatError> {
        let version = codec::read_i32(r)?;
        if !(1..=LOG_VERSION).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                record: "experiment log",
                version,
            });
        }
        let count = codec::read_len(r)?;
        let mut intervals = Vec::with_capacity(count.min(MAX_INTERVALS as usize));
        for _ in 0..count {
            intervals.push(IntervalSnapshot::decode(r)?);
        }
        let global = IntervalSnapshot::decode(r)?;
        let ts_start = codec::read_u64(r)?;
        let ts_last = codec::read_u64(r)?;
        let interval_size = codec::read_u64(r)?;
        if interval_size == 0 {
            return Err(FormatError::Invalid {
                what: "interval size",
                value: 0,
            });
        }
        let num_edges = codec::read_index(r, "edge count")?;
        let num_paths = codec::read_index(r, "path count")?;
        let packet_size_threshold = if version >= 2 {
            let v = codec::read_i32(r)?;
            u32::try_from(v).map_err(|_| FormatError::Invalid {
                what: "packet size threshold",
                value: v as i64,
            })?
        } else {
            0
        };

        for snapshot in intervals.iter().chain(std::iter::once(&global)) {
            snapshot.check_dimensions(num_edges, num_paths)?;
        }

        Ok(Self {
            intervals,
            global,
            ts_start,
            ts_last,
            interval_size,
            num_edges,
            num_paths,
            packet_size_threshold,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), MeasurementError> {
        let file = File::create(path).map_err(|source| MeasurementError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .and_then(|()| writer.flush().map_err(FormatError::from))
            .map_err(|source| MeasurementError::Save {
                path: path.to_path_buf(),
                source,
            })?;
        log::info!(
            "Saved {} intervals to {}",
            self.intervals.len(),
            path.display()
        );
        Ok(())
    }

    /// Reads a log from disk and trims trailing empty intervals.
    pub fn load(path: &Path) -> Result<Self, MeasurementError> {
        let file = File::open(path).map_err(|source| MeasurementError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::with_capacity(64 * 1024, file);
        let mut log = Self::read_from(&mut reader).map_err(|source| MeasurementError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        log.trim();
        log::info!(
            "Loaded {} intervals ({} edges, {} paths) from {}",
            log.intervals.len(),
            log.num_edges,
            log.num_paths,
            path.display()
        );
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::LinkMeasurement;
    use std::io::Cursor;

    const SECOND: u64 = 1_000_000_000;

    fn small_log(interval_size: u64) -> ExperimentLog {
        ExperimentLog::new(
            LogParams {
                ts_start: 0,
                expected_duration: 0,
                interval_size,
                num_edges: 1,
                num_paths: 2,
                packet_size_threshold: 0,
            },
            &[(0, 0), (0, 1)],
        )
        .unwrap()
    }

    #[test]
    fn test_window_is_clamped() {
        let log = small_log(SECOND);
        assert_eq!(log.num_intervals(), 100);

        let log = ExperimentLog::new(
            LogParams {
                ts_start: 0,
                expected_duration: 1_000_000 * SECOND,
                interval_size: SECOND,
                num_edges: 1,
                num_paths: 1,
                packet_size_threshold: 0,
            },
            &[],
        )
        .unwrap();
        assert_eq!(log.num_intervals(), 10_000);
    }

    #[test]
    fn test_zero_interval_size_rejected() {
        let params = LogParams {
            ts_start: 0,
            expected_duration: SECOND,
            interval_size: 0,
            num_edges: 1,
            num_paths: 1,
            packet_size_threshold: 0,
        };
        assert!(matches!(
            ExperimentLog::new(params, &[]),
            Err(MeasurementError::InvalidIntervalSize)
        ));
    }

    #[test]
    fn test_routing_out_of_range_rejected() {
        let params = LogParams {
            ts_start: 0,
            expected_duration: SECOND,
            interval_size: SECOND,
            num_edges: 1,
            num_paths: 1,
            packet_size_threshold: 0,
        };
        assert!(ExperimentLog::new(params, &[(1, 0)]).is_err());
    }

    #[test]
    fn test_open_interval_boundaries() {
        let mut log = small_log(5 * SECOND);
        log.ts_start = 10;
        assert_eq!(log.timestamp_to_open_interval(10), Some(0));
        assert_eq!(log.timestamp_to_open_interval(10 + 5 * SECOND), Some(0));
        assert_eq!(log.timestamp_to_open_interval(10 + 15 * SECOND), Some(2));
        assert_eq!(log.timestamp_to_open_interval(11 + 15 * SECOND), Some(3));
        assert_eq!(log.timestamp_to_interval(11 + 15 * SECOND), Some(3));
        assert_eq!(log.timestamp_to_interval(9), None);
        assert_eq!(log.timestamp_to_interval(10 + 500 * SECOND), None);
    }

    #[test]
    fn test_out_of_window_call_is_noop() {
        let mut log = small_log(SECOND);
        let before = log.clone();
        log.count_packet_in_flight_edge(0, Some(0), 0, 1_000 * SECOND, 1500, 5);
        log.count_packet_dropped(0, 0, 1_000 * SECOND, 1_001 * SECOND, 1500, 5);
        assert_eq!(log, before);
    }

    #[test]
    fn test_small_packets_ignored() {
        let mut log = small_log(SECOND);
        log.packet_size_threshold = 100;
        log.count_packet_in_flight_path(0, 0, SECOND / 2, 99, 1);
        assert_eq!(log.global.paths[0].in_flight, 0);
        log.count_packet_in_flight_path(0, 0, SECOND / 2, 100, 1);
        assert_eq!(log.global.paths[0].in_flight, 1);
        assert_eq!(log.intervals[0].paths[0].in_flight, 1);
    }

    #[test]
    fn test_unrouted_pair_is_not_added() {
        let mut log = small_log(SECOND);
        log.count_packet_in_flight_edge(0, Some(7), 0, 10, 1500, 1);
        assert_eq!(log.global.edges[0].in_flight, 1);
        assert_eq!(log.global.edge_paths.len(), 2);
        assert!(log.intervals[0].edge_path(0, 7).is_none());
    }

    #[test]
    fn test_span_counts_every_covered_interval() {
        let mut log = small_log(SECOND);
        log.count_packet_in_flight_path(1, SECOND / 2, 3 * SECOND, 1500, 2);
        let counts: Vec<u64> = log.intervals[..4].iter().map(|s| s.paths[1].in_flight).collect();
        assert_eq!(counts, vec![2, 2, 2, 0]);
        assert_eq!(log.global.paths[1].in_flight, 2);
        assert_eq!(log.ts_last, 3 * SECOND);
    }

    #[test]
    fn test_record_events() {
        let mut log = small_log(SECOND);
        log.record_packet_event_edge(0, Some(1), 0, 10, 1500, 3, true);
        log.record_packet_event_edge(0, Some(1), 0, 10, 1500, 1, false);
        log.record_packet_event_path(1, 0, 10, 1500, 2, false);
        let snapshot = &log.intervals[0];
        assert_eq!(snapshot.edges[0].events.to_vec(), vec![true, true, true, false]);
        assert_eq!(snapshot.edge_path(0, 1).map(|m| m.events.len()), Some(4));
        assert_eq!(snapshot.paths[1].events.count_dropped(), 2);
        assert!(log.global.edges[0].events.is_empty());
    }

    #[test]
    fn test_trim_keeps_gaps() {
        let mut log = small_log(SECOND);
        log.count_packet_in_flight_path(0, 0, 1, 1500, 1);
        log.count_packet_in_flight_edge(0, None, 5 * SECOND, 5 * SECOND + 1, 1500, 1);
        log.trim();
        assert_eq!(log.num_intervals(), 6);

        let mut empty = small_log(SECOND);
        empty.trim();
        assert_eq!(empty.num_intervals(), 0);
    }

    #[test]
    fn test_resample_sums_groups() {
        let mut log = small_log(SECOND);
        for i in 0..5 {
            log.count_packet_in_flight_path(0, i * SECOND, i * SECOND + 1, 1500, i + 1);
        }
        log.trim();
        let coarse = log.resample(2 * SECOND + 1);
        assert_eq!(coarse.interval_size, 3 * SECOND);
        let counts: Vec<u64> = coarse.intervals.iter().map(|s| s.paths[0].in_flight).collect();
        assert_eq!(counts, vec![1 + 2 + 3, 4 + 5]);
        assert_eq!(log.num_intervals(), 5);
        assert_eq!(log.resample(SECOND), log);
    }

    #[test]
    fn test_version_1_has_no_threshold() {
        let log = small_log(SECOND);
        let mut buf = Vec::new();
        log.write_to(&mut buf).unwrap();
        // rewrite as version 1 by dropping the trailing threshold
        buf[..4].copy_from_slice(&1i32.to_le_bytes());
        buf.truncate(buf.len() - 4);
        let decoded = ExperimentLog::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.packet_size_threshold, 0);
        assert_eq!(decoded.num_intervals(), log.num_intervals());
    }

    #[test]
    fn test_truncated_file_rejected() {
        let mut log = small_log(SECOND);
        log.count_packet_in_flight_path(0, 0, 1, 1500, 1);
        let mut buf = Vec::new();
        log.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(matches!(
            ExperimentLog::read_from(&mut Cursor::new(buf)),
            Err(FormatError::Truncated)
        ));
    }

    #[test]
    fn test_snapshot_dimensions_must_match_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.bin");

        let mut log = small_log(SECOND);
        log.count_packet_in_flight_path(1, 0, 1, 1500, 10);
        log.intervals[0].paths.truncate(1);
        log.save(&path).unwrap();
        assert!(matches!(
            ExperimentLog::load(&path),
            Err(MeasurementError::Load {
                source: FormatError::Invalid { what: "snapshot dimensions", value: 1 },
                ..
            })
        ));

        let mut log = small_log(SECOND);
        log.global.edge_paths.insert((0, 5), LinkMeasurement::new());
        log.save(&path).unwrap();
        assert!(matches!(ExperimentLog::load(&path), Err(MeasurementError::Load { .. })));

        let mut log = small_log(SECOND);
        log.num_edges = 2;
        log.save(&path).unwrap();
        assert!(matches!(ExperimentLog::load(&path), Err(MeasurementError::Load { .. })));
    }

    #[test]
    fn test_unknown_top_level_version() {
        let mut buf = Vec::new();
        codec::write_i32(&mut buf, 3).unwrap();
        assert!(matches!(
            ExperimentLog::read_from(&mut Cursor::new(buf)),
            Err(FormatError::UnsupportedVersion { version: 3, .. })
        ));
    }
}
