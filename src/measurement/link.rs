//! Per-link (or per-path) forwarding counters for one interval.

use std::cmp::Ordering;
use std::io::{Read, Write};
use std::ops::AddAssign;

use rand::seq::SliceRandom;
use rand::Rng;

use super::bits::EventBits;
use super::codec::{self, FormatError};

const LINK_VERSION: i32 = 4;

/// Forwarding counters and (optionally) the per-packet event trace of one link or path.
///
/// `dropped` never exceeds `in_flight` when the counters are fed through
/// [`ExperimentLog`](super::ExperimentLog). `events` normally holds
/// `in_flight` bits, but is empty when only aggregate counts were recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkMeasurement {
    pub in_flight: u64,
    pub dropped: u64,
    pub events: EventBits,
}

impl LinkMeasurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of packets forwarded, or `None` when nothing was in flight.
    pub fn success_rate(&self) -> Option<f64> {
        if self.in_flight == 0 {
            return None;
        }
        let dropped = self.dropped.min(self.in_flight);
        Some(1.0 - dropped as f64 / self.in_flight as f64)
    }

    /// Fraction of packets dropped, or `None` when nothing was in flight.
    pub fn loss_rate(&self) -> Option<f64> {
        self.success_rate().map(|rate| 1.0 - rate)
    }

    pub fn clear(&mut self) {
        self.in_flight = 0;
        self.dropped = 0;
        self.events.clear();
    }

    /// Subsamples `packet_count` packets without replacement.
    ///
    /// Requests larger than `in_flight` leave the measurement untouched. When
    /// the event trace does not cover every packet, an exchangeable trace with
    /// exactly `dropped` drops is synthesized first.
    pub fn sample<R: Rng + ?Sized>(&mut self, packet_count: u64, rng: &mut R) {
        if packet_count > self.in_flight {
            return;
        }

        let mut events: Vec<bool> = if self.events.len() == self.in_flight {
            self.events.to_vec()
        } else {
            let dropped = self.dropped.min(self.in_flight);
            let mut synthesized: Vec<bool> = (0..self.in_flight).map(|i| i >= dropped).collect();
            synthesized.shuffle(rng);
            synthesized
        };

        let (sampled, _) = events.partial_shuffle(rng, packet_count as usize);

        self.in_flight = sampled.len() as u64;
        self.dropped = sampled.iter().filter(|forwarded| !**forwarded).count() as u64;
        let mut trace = EventBits::with_capacity(sampled.len());
        for &forwarded in sampled.iter() {
            trace.push(forwarded);
        }
        self.events = trace;
    }

    /// Orders two measurements by success rate; empty measurements rank as rate 0.
    pub fn cmp_success_rate(&self, other: &Self) -> Ordering {
        let a = self.success_rate().unwrap_or(0.0);
        let b = other.success_rate().unwrap_or(0.0);
        a.total_cmp(&b)
    }

    pub(crate) fn encode(&self, w: &mut impl Write) -> Result<(), FormatError> {
        codec::write_i32(w, LINK_VERSION)?;
        codec::write_counter(w, self.in_flight)?;
        codec::write_counter(w, self.dropped)?;
        self.events.encode(w)
    }

    pub(crate) fn decode(r: &mut impl Read) -> Result<Self, FormatError> {
        let version = codec::read_i32(r)?;
        let mut measurement = LinkMeasurement::new();
        match version {
            1 => {
                measurement.in_flight = codec::read_u64(r)?;
                measurement.dropped = codec::read_u64(r)?;
            }
            2 => {
                measurement.in_flight = codec::read_u16(r)? as u64;
                measurement.dropped = codec::read_u16(r)? as u64;
            }
            3 => {
                measurement.in_flight = codec::read_counter(r)?;
                measurement.dropped = codec::read_counter(r)?;
            }
            4 => {
                measurement.in_flight = codec::read_counter(r)?;
                measurement.dropped = codec::read_counter(r)?;
                measurement.events = EventBits::decode(r)?;
            }
            other => {
                return Err(FormatError::UnsupportedVersion {
                    record: "link measurement",
                    version: other,
                })
            }
        }
        Ok(measurement)
    }
}

/// Sums the counters only; event traces are never concatenated.
impl AddAssign<&LinkMeasurement> for LinkMeasurement {
    fn add_assign(&mut self, other: &LinkMeasurement) {
        self.in_flight += other.in_flight;
        self.dropped += other.dropped;
    }
}

/// Sorts measurements by ascending success rate, for presentation.
pub fn sort_by_success_rate(measurements: &mut [LinkMeasurement]) {
    measurements.sort_by(LinkMeasurement::cmp_success_rate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Cursor;

    fn counts(in_flight: u64, dropped: u64) -> LinkMeasurement {
        LinkMeasurement {
            in_flight,
            dropped,
            events: EventBits::new(),
        }
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(counts(0, 0).success_rate(), None);
        assert_eq!(counts(100, 10).success_rate(), Some(0.9));
        assert_eq!(counts(4, 4).success_rate(), Some(0.0));
        assert_eq!(counts(4, 1).loss_rate(), Some(0.25));
    }

    #[test]
    fn test_sample_larger_than_available_is_noop() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut m = counts(10, 3);
        let before = m.clone();
        m.sample(11, &mut rng);
        assert_eq!(m, before);
    }

    #[test]
    fn test_sample_aggregate_only() {
        let mut rng = StdRng::seed_from_u64(1);
        for k in [0u64, 1, 17, 50, 100] {
            let mut m = counts(100, 30);
            m.sample(k, &mut rng);
            assert_eq!(m.in_flight, k);
            assert!(m.dropped <= k);
            assert_eq!(m.events.len(), k);
            assert_eq!(m.events.count_dropped(), m.dropped);
        }
    }

    #[test]
    fn test_sample_full_size_preserves_counts() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut m = counts(64, 9);
        m.sample(64, &mut rng);
        assert_eq!(m.in_flight, 64);
        assert_eq!(m.dropped, 9);
    }

    #[test]
    fn test_sample_replays_recorded_events() {
        let mut rng = StdRng::seed_from_u64(11);
        // trace holds three drops while the counter holds none
        let trace: EventBits = [true, false, true, true, false, true, false, true]
            .into_iter()
            .collect();
        let mut m = LinkMeasurement {
            in_flight: 8,
            dropped: 0,
            events: trace.clone(),
        };
        m.sample(8, &mut rng);
        assert_eq!(m.in_flight, 8);
        assert_eq!(m.dropped, 3);
        assert_eq!(m.events.count_dropped(), 3);

        let mut m = LinkMeasurement {
            in_flight: 8,
            dropped: 0,
            events: trace,
        };
        m.sample(5, &mut rng);
        assert_eq!(m.in_flight, 5);
        assert_eq!(m.events.len(), 5);
        assert_eq!(m.events.count_dropped(), m.dropped);
        assert!(m.dropped <= 3);

        let mut m = LinkMeasurement {
            in_flight: 8,
            dropped: 0,
            events: std::iter::repeat(true).take(8).collect(),
        };
        m.sample(5, &mut rng);
        assert_eq!(m.dropped, 0);
    }

    #[test]
    fn test_sample_is_reproducible_with_seed() {
        let mut a = counts(1000, 200);
        let mut b = counts(1000, 200);
        a.sample(100, &mut StdRng::seed_from_u64(42));
        b.sample(100, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_add_assign_sums_counters_only() {
        let mut a = counts(10, 2);
        a.events.push(true);
        let mut b = counts(5, 1);
        b.events.push(false);
        a += &b;
        assert_eq!(a.in_flight, 15);
        assert_eq!(a.dropped, 3);
        assert_eq!(a.events.len(), 1);
    }

    #[test]
    fn test_sort_by_success_rate() {
        let mut list = vec![counts(10, 0), counts(10, 5), counts(0, 0), counts(10, 1)];
        sort_by_success_rate(&mut list);
        let rates: Vec<f64> = list.iter().map(|m| m.success_rate().unwrap_or(0.0)).collect();
        assert_eq!(rates, vec![0.0, 0.5, 0.9, 1.0]);
    }

    #[test]
    fn test_legacy_versions_decode() {
        let mut v1 = Vec::new();
        codec::write_i32(&mut v1, 1).unwrap();
        codec::write_u64(&mut v1, 500).unwrap();
        codec::write_u64(&mut v1, 7).unwrap();
        let m = LinkMeasurement::decode(&mut Cursor::new(v1)).unwrap();
        assert_eq!((m.in_flight, m.dropped), (500, 7));
        assert!(m.events.is_empty());

        let mut v2 = Vec::new();
        codec::write_i32(&mut v2, 2).unwrap();
        codec::write_u16(&mut v2, 300).unwrap();
        codec::write_u16(&mut v2, 3).unwrap();
        let m = LinkMeasurement::decode(&mut Cursor::new(v2)).unwrap();
        assert_eq!((m.in_flight, m.dropped), (300, 3));

        let mut v3 = Vec::new();
        codec::write_i32(&mut v3, 3).unwrap();
        codec::write_counter(&mut v3, 70_000).unwrap();
        codec::write_counter(&mut v3, 12).unwrap();
        let m = LinkMeasurement::decode(&mut Cursor::new(v3)).unwrap();
        assert_eq!((m.in_flight, m.dropped), (70_000, 12));
    }

    #[test]
    fn test_unknown_version_is_typed_error() {
        let mut buf = Vec::new();
        codec::write_i32(&mut buf, 9).unwrap();
        assert!(matches!(
            LinkMeasurement::decode(&mut Cursor::new(buf)),
            Err(FormatError::UnsupportedVersion { version: 9, .. })
        ));
    }
}
