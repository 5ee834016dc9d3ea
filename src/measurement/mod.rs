//! Per-interval packet accounting and its persisted binary format.
//!
//! The layers nest as follows:
//!
//! - [`LinkMeasurement`]: forwarded/dropped counters plus an [`EventBits`] trace
//!   for one link or path
//! - [`IntervalSnapshot`]: every link, path and routed (link, path) pair for one
//!   time bucket
//! - [`ExperimentLog`]: the ordered snapshots of a whole experiment plus a global
//!   accumulator
//!
//! Each layer is written with its own version tag so older files stay readable.

pub mod bits;
pub mod codec;
pub mod experiment;
pub mod link;
pub mod snapshot;

pub use bits::EventBits;
pub use codec::FormatError;
pub use experiment::{ExperimentLog, LogParams, MeasurementError};
pub use link::{sort_by_success_rate, LinkMeasurement};
pub use snapshot::{EdgePath, IntervalSnapshot};
