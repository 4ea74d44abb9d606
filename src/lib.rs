//! Multi-resolution rolling counters
//!
//! Samples are submitted against `(namespace, counter)` keys and aggregated
//! at several resolutions at once: an all-time total, rolling windows of
//! fixed-width buckets and windows that also estimate distinct senders with
//! HyperLogLog.
//!
//! - [`aggregation`]: windows, meters, the resolution ladder
//! - [`store`]: the in-memory and durable stores behind [`store::CounterBackend`]
//! - [`persistence`]: object stores, record layout, snapshots
//! - [`commands`] and [`server`]: the line protocol over TCP

pub mod aggregation;
pub mod clock;
pub mod commands;
pub mod config;
pub mod observability;
pub mod persistence;
pub mod server;
pub mod store;

pub use aggregation::{BucketData, CounterKey, MeterSet, RangeHint, ResolutionLadder, Series, Timestamp};
pub use clock::{Clock, SimulatedClock, SystemClock};
pub use config::{BackendKind, ConfigError, EngineConfig};
pub use persistence::{SnapshotConfig, SnapshotManager};
pub use server::CounterServer;
pub use store::{AggregationStore, CounterBackend, DurableStore, StoreError, Submission};
