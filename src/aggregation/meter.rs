//! Meters: accumulate samples and report a time series
//!
//! - `TotalMeter`: no time axis, sums forever
//! - `HistoryMeter`: a rolling window of sum/count buckets
//! - `CardinalityMeter`: a rolling window plus one live HyperLogLog bound to
//!   the open bucket
//!
//! `Meter` is the closed set of variants a `MeterSet` holds.

use super::hyperloglog::HyperLogLog;
use super::resolution::MeterKind;
use super::types::{BucketData, Sample, Series};
use super::window::{Placement, RollingWindow};
use tracing::debug;

/// All-time sum and count
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TotalMeter {
    pub(crate) sum: f64,
    pub(crate) count: u64,
}

impl TotalMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sample: &Sample<'_>) {
        self.sum += sample.value;
        self.count += 1;
    }

    pub fn data(&self) -> Series {
        vec![BucketData {
            time: 0,
            sum: self.sum,
            count: self.count,
            unique: 0,
        }]
    }
}

/// Rolling sum/count history
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryMeter {
    pub(crate) window: RollingWindow,
}

impl HistoryMeter {
    pub fn new(period: i64, backlog: usize) -> Self {
        HistoryMeter {
            window: RollingWindow::new(period, backlog),
        }
    }

    pub fn add(&mut self, sample: &Sample<'_>) -> Placement {
        let placement = self
            .window
            .add(sample.timestamp.as_secs(), |b| b.record(sample.value));
        if placement == Placement::Dropped {
            debug!(
                timestamp = sample.timestamp.as_secs(),
                window_start = self.window.window_start(),
                "sample older than retained history dropped"
            );
        }
        placement
    }

    pub fn roll_to(&mut self, now: i64) -> bool {
        self.window.roll_to(now)
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn data(&self) -> Series {
        self.window.data()
    }
}

/// Rolling history with a distinct-sender estimate per bucket.
///
/// Only the open bucket has a live estimator. When the window rotates the
/// estimator is discarded; closed buckets keep the last scalar estimate and
/// are never recomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct CardinalityMeter {
    pub(crate) history: HistoryMeter,
    pub(crate) precision: u8,
    pub(crate) estimator: Option<HyperLogLog>,
}

impl CardinalityMeter {
    pub fn new(period: i64, backlog: usize, precision: u8) -> Self {
        CardinalityMeter {
            history: HistoryMeter::new(period, backlog),
            precision,
            estimator: None,
        }
    }

    pub fn add(&mut self, sample: &Sample<'_>) -> Placement {
        let placement = self.history.add(sample);

        if let Placement::Head { rotated } = placement {
            if rotated {
                self.estimator = None;
            }
            if sample.has_sender() {
                let precision = self.precision;
                let estimator = self
                    .estimator
                    .get_or_insert_with(|| HyperLogLog::new(precision));
                if estimator.insert(sample.sender.as_bytes()) {
                    self.history.window.head_bucket_mut().unique = estimator.estimate();
                }
            }
        }
        placement
    }

    pub fn roll_to(&mut self, now: i64) -> bool {
        let rotated = self.history.roll_to(now);
        if rotated {
            self.estimator = None;
        }
        rotated
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn estimator(&self) -> Option<&HyperLogLog> {
        self.estimator.as_ref()
    }

    pub fn window(&self) -> &RollingWindow {
        self.history.window()
    }

    pub fn data(&self) -> Series {
        self.history.data()
    }
}

/// One resolution's meter
#[derive(Debug, Clone, PartialEq)]
pub enum Meter {
    Total(TotalMeter),
    History(HistoryMeter),
    Cardinality(CardinalityMeter),
}

impl Meter {
    pub fn from_kind(kind: &MeterKind) -> Self {
        match *kind {
            MeterKind::Total => Meter::Total(TotalMeter::new()),
            MeterKind::History { period, backlog } => {
                Meter::History(HistoryMeter::new(period, backlog))
            }
            MeterKind::Cardinality {
                period,
                backlog,
                precision,
            } => Meter::Cardinality(CardinalityMeter::new(period, backlog, precision)),
        }
    }

    /// True if this meter has the shape `kind` describes
    pub fn matches(&self, kind: &MeterKind) -> bool {
        match (self, *kind) {
            (Meter::Total(_), MeterKind::Total) => true,
            (Meter::History(m), MeterKind::History { period, backlog }) => {
                m.window.period() == period && m.window.len() == backlog
            }
            (
                Meter::Cardinality(m),
                MeterKind::Cardinality {
                    period,
                    backlog,
                    precision,
                },
            ) => {
                m.window().period() == period
                    && m.window().len() == backlog
                    && m.precision == precision
            }
            _ => false,
        }
    }

    pub fn add(&mut self, sample: &Sample<'_>) {
        match self {
            Meter::Total(m) => m.add(sample),
            Meter::History(m) => {
                m.add(sample);
            }
            Meter::Cardinality(m) => {
                m.add(sample);
            }
        }
    }

    /// Rotate windowed meters forward to `now`; the total meter has no axis.
    pub fn roll_to(&mut self, now: i64) {
        match self {
            Meter::Total(_) => {}
            Meter::History(m) => {
                m.roll_to(now);
            }
            Meter::Cardinality(m) => {
                m.roll_to(now);
            }
        }
    }

    pub fn data(&self) -> Series {
        match self {
            Meter::Total(m) => m.data(),
            Meter::History(m) => m.data(),
            Meter::Cardinality(m) => m.data(),
        }
    }
}
