//! Durable Persistence
//!
//! - `object_store`: the opaque key-value engine (in-memory or local files)
//! - `records`: explicit record layout for meters and counters
//! - `snapshot`: checksummed whole-store snapshot format
//! - `manager`: startup hydration and the periodic snapshot loop

pub mod manager;
pub mod object_store;
pub mod records;
pub mod snapshot;

pub use manager::{
    HydrateOutcome, SnapshotConfig, SnapshotManager, SnapshotStats, SnapshotWorkerHandle,
    DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_SNAPSHOT_KEY,
};
pub use object_store::{InMemoryObjectStore, LocalFsObjectStore, ObjectStore};
pub use records::{CounterRecord, MeterRecord, RecordError, StoreImage};
pub use snapshot::{
    decode_snapshot, encode_snapshot, Compression, SnapshotError, SnapshotReader, SnapshotWriter,
};
