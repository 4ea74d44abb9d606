//! Resolution ladder and query range hints
//!
//! A ladder is the ordered list of resolutions every counter tracks, finest
//! first. The default ladder:
//!
//! | name     | period | backlog | uniqueness      |
//! |----------|--------|---------|-----------------|
//! | `total`  | -      | -       | no              |
//! | `live`   | 10s    | 10      | no              |
//! | `hourly` | 4h     | 7       | no              |
//! | `daily`  | 1d     | 7       | precision 10    |
//! | `weekly` | 1w     | 4       | precision 12    |

use super::hyperloglog::{PRECISION_MAX, PRECISION_MIN};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

pub const LIVE_PERIOD_SECS: i64 = 10;
pub const LIVE_BACKLOG: usize = 10;
pub const HOURLY_PERIOD_SECS: i64 = 60 * 60 * 4;
pub const HOURLY_BACKLOG: usize = 7;
pub const DAILY_PERIOD_SECS: i64 = 60 * 60 * 24;
pub const DAILY_BACKLOG: usize = 7;
pub const DAILY_PRECISION: u8 = 10;
pub const WEEKLY_PERIOD_SECS: i64 = 60 * 60 * 24 * 7;
pub const WEEKLY_BACKLOG: usize = 4;
pub const WEEKLY_PRECISION: u8 = 12;

/// How one resolution aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MeterKind {
    /// All-time sum and count
    Total,
    /// Rolling window of `backlog` buckets, `period` seconds each
    History { period: i64, backlog: usize },
    /// Rolling window plus a distinct-sender estimate per bucket
    Cardinality {
        period: i64,
        backlog: usize,
        precision: u8,
    },
}

impl MeterKind {
    /// Time covered by the retained buckets; `None` for the all-time meter
    pub fn span(&self) -> Option<i64> {
        match *self {
            MeterKind::Total => None,
            MeterKind::History { period, backlog }
            | MeterKind::Cardinality {
                period, backlog, ..
            } => Some(period.saturating_mul(backlog as i64)),
        }
    }
}

/// One named resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: MeterKind,
}

impl ResolutionSpec {
    pub fn total(name: &str) -> Self {
        ResolutionSpec {
            name: name.to_string(),
            kind: MeterKind::Total,
        }
    }

    pub fn history(name: &str, period: i64, backlog: usize) -> Self {
        ResolutionSpec {
            name: name.to_string(),
            kind: MeterKind::History { period, backlog },
        }
    }

    pub fn cardinality(name: &str, period: i64, backlog: usize, precision: u8) -> Self {
        ResolutionSpec {
            name: name.to_string(),
            kind: MeterKind::Cardinality {
                period,
                backlog,
                precision,
            },
        }
    }
}

/// Error for an unusable ladder definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resolution ladder: {0}")]
pub struct LadderError(pub String);

/// Validated, ordered set of resolutions (finest to coarsest)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionLadder {
    specs: Vec<ResolutionSpec>,
}

impl Default for ResolutionLadder {
    fn default() -> Self {
        ResolutionLadder {
            specs: default_specs(),
        }
    }
}

pub fn default_specs() -> Vec<ResolutionSpec> {
    vec![
        ResolutionSpec::total("total"),
        ResolutionSpec::history("live", LIVE_PERIOD_SECS, LIVE_BACKLOG),
        ResolutionSpec::history("hourly", HOURLY_PERIOD_SECS, HOURLY_BACKLOG),
        ResolutionSpec::cardinality("daily", DAILY_PERIOD_SECS, DAILY_BACKLOG, DAILY_PRECISION),
        ResolutionSpec::cardinality(
            "weekly",
            WEEKLY_PERIOD_SECS,
            WEEKLY_BACKLOG,
            WEEKLY_PRECISION,
        ),
    ]
}

impl ResolutionLadder {
    pub fn new(specs: Vec<ResolutionSpec>) -> Result<Self, LadderError> {
        if specs.is_empty() {
            return Err(LadderError("at least one resolution is required".into()));
        }

        let mut names = HashSet::new();
        let mut last_span = 0i64;
        for spec in &specs {
            if spec.name.is_empty() || spec.name.contains(char::is_whitespace) {
                return Err(LadderError(format!("bad resolution name {:?}", spec.name)));
            }
            if spec.name.parse::<i64>().is_ok() {
                return Err(LadderError(format!(
                    "resolution name {:?} would be read as a span",
                    spec.name
                )));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(LadderError(format!("duplicate resolution {:?}", spec.name)));
            }
            match spec.kind {
                MeterKind::Total => {}
                MeterKind::History { period, backlog }
                | MeterKind::Cardinality {
                    period, backlog, ..
                } => {
                    if period <= 0 || backlog == 0 {
                        return Err(LadderError(format!(
                            "{}: period and backlog must be positive",
                            spec.name
                        )));
                    }
                }
            }
            if let MeterKind::Cardinality { precision, .. } = spec.kind {
                if !(PRECISION_MIN..=PRECISION_MAX).contains(&precision) {
                    return Err(LadderError(format!(
                        "{}: precision {} outside {}..={}",
                        spec.name, precision, PRECISION_MIN, PRECISION_MAX
                    )));
                }
            }
            if let Some(span) = spec.kind.span() {
                if span < last_span {
                    return Err(LadderError(format!(
                        "{}: resolutions must be ordered finest to coarsest",
                        spec.name
                    )));
                }
                last_span = span;
            }
        }

        Ok(ResolutionLadder { specs })
    }

    pub fn specs(&self) -> &[ResolutionSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.name == name)
    }

    /// Pick the single resolution that answers `hint`.
    ///
    /// Returns `None` only for a named hint absent from the ladder.
    pub fn select(&self, hint: &RangeHint) -> Option<usize> {
        match hint {
            RangeHint::Resolution(name) => self.position(name),
            RangeHint::Total => Some(self.select_total()),
            RangeHint::Span(secs) if *secs <= 0 => Some(self.select_total()),
            RangeHint::Span(secs) => Some(self.select_span(*secs)),
        }
    }

    fn select_total(&self) -> usize {
        self.specs
            .iter()
            .position(|s| s.kind == MeterKind::Total)
            .unwrap_or(0)
    }

    fn select_span(&self, secs: i64) -> usize {
        let windowed = || {
            self.specs
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.kind.span().map(|span| (i, span)))
        };
        windowed()
            .find(|&(_, span)| span >= secs)
            .or_else(|| windowed().last())
            .map(|(i, _)| i)
            .unwrap_or_else(|| self.select_total())
    }
}

/// Which resolution a query wants
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RangeHint {
    /// The all-time meter
    #[default]
    Total,
    /// A resolution by ladder name
    Resolution(String),
    /// The finest resolution covering this many seconds
    Span(i64),
}

impl FromStr for RangeHint {
    type Err = std::convert::Infallible;

    /// `total`, an integer number of seconds, or a resolution name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("total") {
            return Ok(RangeHint::Total);
        }
        if let Ok(secs) = s.parse::<i64>() {
            return Ok(RangeHint::Span(secs));
        }
        Ok(RangeHint::Resolution(s.to_ascii_lowercase()))
    }
}
