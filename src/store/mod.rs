//! Counter Stores
//!
//! Two interchangeable backends behind `CounterBackend`:
//!
//! - `AggregationStore`: all counters in memory under one lock, made durable
//!   by the snapshot manager
//! - `DurableStore`: one record per counter in an `ObjectStore`, rolled
//!   forward lazily on every access

mod backend;
mod durable;
mod error;
mod key_encoder;
mod memory;

pub use backend::{
    parse_value, validate_key, BackendFuture, CounterBackend, Submission, DEFAULT_SKEW_WINDOW_SECS,
};
pub use durable::DurableStore;
pub use error::StoreError;
pub use key_encoder::CounterKeyEncoder;
pub use memory::{AggregationStore, CounterMap};
