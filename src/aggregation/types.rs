//! Core value types shared by meters, stores and the wire layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Timestamp(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one tracked counter
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub namespace: String,
    pub name: String,
}

impl CounterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        CounterKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// One submitted observation
///
/// An empty sender is anonymous and never counts toward uniqueness.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<'a> {
    pub timestamp: Timestamp,
    pub value: f64,
    pub sender: &'a str,
}

impl<'a> Sample<'a> {
    pub fn new(timestamp: Timestamp, value: f64, sender: &'a str) -> Self {
        Sample {
            timestamp,
            value,
            sender,
        }
    }

    /// Anonymous sample (no sender)
    pub fn anonymous(timestamp: Timestamp, value: f64) -> Self {
        Self::new(timestamp, value, "")
    }

    pub fn has_sender(&self) -> bool {
        !self.sender.is_empty()
    }
}

/// Aggregated data for one time slot, as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BucketData {
    /// Interval start (unix seconds); zero for the all-time meter
    pub time: i64,
    /// Accumulated value
    pub sum: f64,
    /// How many samples landed in the slot
    pub count: u64,
    /// Estimated distinct senders (zero for meters without uniqueness)
    pub unique: u64,
}

/// Newest-first sequence of buckets
pub type Series = Vec<BucketData>;
