//! Backend abstraction shared by the in-memory and durable stores
//!
//! The transport layer only sees `CounterBackend`; which store sits behind it
//! is a startup decision.

use super::error::StoreError;
use crate::aggregation::{RangeHint, Series, Timestamp};
use std::future::Future;
use std::pin::Pin;

/// Default accepted distance between an explicit timestamp and now
pub const DEFAULT_SKEW_WINDOW_SECS: i64 = 24 * 60 * 60;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// One validated-on-entry submit request
#[derive(Debug, Clone, PartialEq)]
pub struct Submission<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub value: f64,
    /// Empty for anonymous samples
    pub sender: &'a str,
    /// Client-supplied time; ignored when outside the skew window
    pub timestamp: Option<Timestamp>,
}

impl<'a> Submission<'a> {
    pub fn new(namespace: &'a str, name: &'a str, value: f64) -> Self {
        Submission {
            namespace,
            name,
            value,
            sender: "",
            timestamp: None,
        }
    }

    pub fn with_sender(mut self, sender: &'a str) -> Self {
        self.sender = sender;
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Reject samples that must never reach a meter
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_key(self.namespace, self.name)?;
        if !self.value.is_finite() {
            return Err(StoreError::InvalidValue(self.value.to_string()));
        }
        Ok(())
    }

    /// The timestamp to record: the explicit one if it lies strictly within
    /// `skew_window` seconds of `now`, otherwise `now`.
    pub fn effective_timestamp(&self, now: Timestamp, skew_window: i64) -> Timestamp {
        match self.timestamp {
            Some(t) if t.as_secs().abs_diff(now.as_secs()) < skew_window.unsigned_abs() => t,
            _ => now,
        }
    }
}

pub fn validate_key(namespace: &str, name: &str) -> Result<(), StoreError> {
    if namespace.is_empty() {
        return Err(StoreError::InvalidKey("namespace is empty".into()));
    }
    if name.is_empty() {
        return Err(StoreError::InvalidKey("counter name is empty".into()));
    }
    Ok(())
}

/// Parse a client-supplied numeric value
pub fn parse_value(raw: &str) -> Result<f64, StoreError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| StoreError::InvalidValue(raw.to_string()))?;
    if !value.is_finite() {
        return Err(StoreError::InvalidValue(raw.to_string()));
    }
    Ok(value)
}

/// Counter storage as seen by the transport layer
pub trait CounterBackend: Send + Sync + 'static {
    /// Record one sample; returns the timestamp it was recorded at
    fn submit<'a>(&'a self, submission: Submission<'a>) -> BackendFuture<'a, Timestamp>;

    /// Newest-first series of the resolution selected by `hint`
    fn query<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        hint: &'a RangeHint,
    ) -> BackendFuture<'a, Series>;

    /// Counter names in `namespace`, lexicographically ordered
    fn list<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, Vec<String>>;
}
