//! Persisted record layout
//!
//! Meters are never serialized directly. Each one is converted into an
//! explicit record that names every piece of state it needs to resume
//! exactly where it stopped: bucket contents, head index, window start and
//! estimator registers.
//!
//! ```text
//! StoreImage
//! └── CounterRecord { namespace, name, accessed_at }
//!     └── MeterRecord (one per ladder resolution, ladder order)
//!         ├── Total { sum, count }
//!         ├── History(WindowRecord)
//!         └── Cardinality { window, precision, estimator? }
//! ```
//!
//! Decoding checks every record against the configured ladder; a record
//! that does not fit is rejected, never patched.

use crate::aggregation::{
    Bucket, CardinalityMeter, CounterKey, HistoryMeter, HyperLogLog, Meter, MeterSet,
    ResolutionLadder, RollingWindow, TotalMeter,
};
use crate::store::CounterMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Version prefix of a standalone counter record
pub const RECORD_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid record: {0}")]
pub struct RecordError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub sum: f64,
    pub count: u64,
    pub unique: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub period: i64,
    pub head: u32,
    pub window_start: i64,
    /// Storage order, not time order
    pub buckets: Vec<BucketRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorRecord {
    pub precision: u8,
    pub registers: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeterRecord {
    Total {
        sum: f64,
        count: u64,
    },
    History(WindowRecord),
    Cardinality {
        window: WindowRecord,
        precision: u8,
        estimator: Option<EstimatorRecord>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub namespace: String,
    pub name: String,
    /// Last time the record was read or written (unix seconds)
    pub accessed_at: i64,
    pub meters: Vec<MeterRecord>,
}

/// The whole in-memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreImage {
    pub counters: Vec<CounterRecord>,
}

impl From<&RollingWindow> for WindowRecord {
    fn from(window: &RollingWindow) -> Self {
        WindowRecord {
            period: window.period(),
            head: window.head_index() as u32,
            window_start: window.window_start(),
            buckets: window
                .buckets()
                .iter()
                .map(|b| BucketRecord {
                    sum: b.sum,
                    count: b.count,
                    unique: b.unique,
                })
                .collect(),
        }
    }
}

impl WindowRecord {
    fn into_window(self) -> Result<RollingWindow, RecordError> {
        let buckets = self
            .buckets
            .into_iter()
            .map(|b| Bucket {
                sum: b.sum,
                count: b.count,
                unique: b.unique,
            })
            .collect();
        RollingWindow::from_parts(self.period, self.head as usize, self.window_start, buckets)
            .ok_or_else(|| {
                RecordError(format!(
                    "inconsistent window (period {}, head {}, start {})",
                    self.period, self.head, self.window_start
                ))
            })
    }
}

impl From<&Meter> for MeterRecord {
    fn from(meter: &Meter) -> Self {
        match meter {
            Meter::Total(m) => MeterRecord::Total {
                sum: m.sum,
                count: m.count,
            },
            Meter::History(m) => MeterRecord::History(WindowRecord::from(m.window())),
            Meter::Cardinality(m) => MeterRecord::Cardinality {
                window: WindowRecord::from(m.window()),
                precision: m.precision(),
                estimator: m.estimator().map(|hll| EstimatorRecord {
                    precision: hll.precision(),
                    registers: hll.registers().to_vec(),
                }),
            },
        }
    }
}

impl MeterRecord {
    pub fn into_meter(self) -> Result<Meter, RecordError> {
        match self {
            MeterRecord::Total { sum, count } => Ok(Meter::Total(TotalMeter { sum, count })),
            MeterRecord::History(window) => Ok(Meter::History(HistoryMeter {
                window: window.into_window()?,
            })),
            MeterRecord::Cardinality {
                window,
                precision,
                estimator,
            } => {
                let estimator = match estimator {
                    None => None,
                    Some(record) if record.precision == precision => Some(
                        HyperLogLog::from_registers(record.precision, record.registers)
                            .ok_or_else(|| RecordError("invalid estimator registers".into()))?,
                    ),
                    Some(record) => {
                        return Err(RecordError(format!(
                            "estimator precision {} does not match meter precision {}",
                            record.precision, precision
                        )))
                    }
                };
                Ok(Meter::Cardinality(CardinalityMeter {
                    history: HistoryMeter {
                        window: window.into_window()?,
                    },
                    precision,
                    estimator,
                }))
            }
        }
    }
}

impl CounterRecord {
    pub fn from_set(key: &CounterKey, set: &MeterSet, accessed_at: i64) -> Self {
        CounterRecord {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            accessed_at,
            meters: set.meters().iter().map(MeterRecord::from).collect(),
        }
    }

    /// Rebuild the counter; fails unless the meters match `ladder` exactly.
    pub fn into_set(
        self,
        ladder: &Arc<ResolutionLadder>,
    ) -> Result<(CounterKey, MeterSet), RecordError> {
        let key = CounterKey::new(self.namespace, self.name);
        let meters = self
            .meters
            .into_iter()
            .map(MeterRecord::into_meter)
            .collect::<Result<Vec<_>, _>>()?;
        let set = MeterSet::from_meters(Arc::clone(ladder), meters).ok_or_else(|| {
            RecordError(format!("{} does not match the configured resolutions", key))
        })?;
        Ok((key, set))
    }

    /// Standalone encoding: one version byte, then bincode
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        let mut out = vec![RECORD_VERSION];
        bincode::serialize_into(&mut out, self).map_err(|e| RecordError(e.to_string()))?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        match bytes.split_first() {
            Some((&RECORD_VERSION, body)) => {
                bincode::deserialize(body).map_err(|e| RecordError(e.to_string()))
            }
            Some((version, _)) => Err(RecordError(format!("unsupported record version {}", version))),
            None => Err(RecordError("empty record".into())),
        }
    }
}

impl StoreImage {
    /// Capture every counter; `accessed_at` is the capture time.
    pub fn capture(counters: &CounterMap, accessed_at: i64) -> Self {
        StoreImage {
            counters: counters
                .iter()
                .map(|(key, set)| CounterRecord::from_set(key, set, accessed_at))
                .collect(),
        }
    }

    /// Rebuild the full map. Any bad counter fails the whole image.
    pub fn restore(self, ladder: &Arc<ResolutionLadder>) -> Result<CounterMap, RecordError> {
        let mut counters = BTreeMap::new();
        for record in self.counters {
            let (key, set) = record.into_set(ladder)?;
            if counters.insert(key.clone(), set).is_some() {
                return Err(RecordError(format!("duplicate counter {}", key)));
            }
        }
        Ok(counters)
    }
}
