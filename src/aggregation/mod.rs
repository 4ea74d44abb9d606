//! Multi-Resolution Rolling-Window Aggregation
//!
//! Per-counter aggregate state, leaves first:
//!
//! ```text
//! Sample → MeterSet ─┬─ TotalMeter
//!                    ├─ HistoryMeter      (RollingWindow)
//!                    └─ CardinalityMeter  (RollingWindow + HyperLogLog)
//! ```
//!
//! Nothing in this module locks or reads the clock; stores own both.

pub mod hyperloglog;
pub mod meter;
pub mod meter_set;
pub mod resolution;
pub mod types;
pub mod window;

pub use hyperloglog::HyperLogLog;
pub use meter::{CardinalityMeter, HistoryMeter, Meter, TotalMeter};
pub use meter_set::MeterSet;
pub use resolution::{LadderError, MeterKind, RangeHint, ResolutionLadder, ResolutionSpec};
pub use types::{BucketData, CounterKey, Sample, Series, Timestamp};
pub use window::{Bucket, Placement, RollingWindow};
