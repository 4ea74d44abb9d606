//! All resolutions tracked for one counter

use super::meter::Meter;
use super::resolution::{RangeHint, ResolutionLadder};
use super::types::{Sample, Series};
use std::sync::Arc;

/// One meter per ladder resolution, in ladder order.
///
/// Every submit reaches every meter; a query reads exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSet {
    ladder: Arc<ResolutionLadder>,
    meters: Vec<Meter>,
}

impl MeterSet {
    pub fn new(ladder: Arc<ResolutionLadder>) -> Self {
        let meters = ladder
            .specs()
            .iter()
            .map(|spec| Meter::from_kind(&spec.kind))
            .collect();
        MeterSet { ladder, meters }
    }

    /// Rebuild from decoded meters. Returns `None` unless the meters line up
    /// one-to-one with the ladder.
    pub fn from_meters(ladder: Arc<ResolutionLadder>, meters: Vec<Meter>) -> Option<Self> {
        if meters.len() != ladder.len() {
            return None;
        }
        let aligned = meters
            .iter()
            .zip(ladder.specs())
            .all(|(meter, spec)| meter.matches(&spec.kind));
        if !aligned {
            return None;
        }
        Some(MeterSet { ladder, meters })
    }

    pub fn ladder(&self) -> &Arc<ResolutionLadder> {
        &self.ladder
    }

    pub fn meters(&self) -> &[Meter] {
        &self.meters
    }

    pub fn submit(&mut self, sample: &Sample<'_>) {
        for meter in &mut self.meters {
            meter.add(sample);
        }
    }

    /// Series of the resolution selected by `hint`, or `None` for an
    /// unknown resolution name.
    pub fn query(&self, hint: &RangeHint) -> Option<Series> {
        let index = self.ladder.select(hint)?;
        self.meters.get(index).map(Meter::data)
    }

    /// Like `query`, but as if the selected meter had been rolled to `now`.
    /// Only a copy of that one meter is rotated.
    pub fn query_at(&self, hint: &RangeHint, now: i64) -> Option<Series> {
        let index = self.ladder.select(hint)?;
        let mut meter = self.meters.get(index)?.clone();
        meter.roll_to(now);
        Some(meter.data())
    }

    /// Rotate every windowed meter so its head covers `now`.
    pub fn roll_to(&mut self, now: i64) {
        for meter in &mut self.meters {
            meter.roll_to(now);
        }
    }
}
