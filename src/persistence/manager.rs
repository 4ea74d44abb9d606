//! Snapshot Manager
//!
//! Startup: read the canonical snapshot and hydrate the store. A missing or
//! undecodable snapshot leaves the store empty and is never fatal.
//!
//! Steady state: every `interval`, capture the whole store under its write
//! lock, encode the copy once the lock is released, write the bytes to
//! `<key>.tmp`, then rename over `<key>`. The
//! canonical key therefore always holds a complete image. A failed cycle is
//! logged and retried on the next tick.
//!
//! ```text
//! tick ──► with_exclusive(capture) ──► encode ──► put(tmp) ──► rename(tmp → key)
//! ```

use super::object_store::ObjectStore;
use super::records::StoreImage;
use super::snapshot::{decode_snapshot, encode_snapshot, Compression, SnapshotError};
use crate::clock::Clock;
use crate::store::AggregationStore;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_SNAPSHOT_KEY: &str = "events.snapshot";
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for snapshot operations
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Canonical object key
    pub key: String,
    pub interval: Duration,
    pub compression: Compression,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            key: DEFAULT_SNAPSHOT_KEY.to_string(),
            interval: DEFAULT_SNAPSHOT_INTERVAL,
            compression: Compression::None,
        }
    }
}

impl SnapshotConfig {
    /// Configuration for tests (fast intervals)
    pub fn test() -> Self {
        SnapshotConfig {
            interval: Duration::from_millis(20),
            ..Self::default()
        }
    }

    /// Key the next image is staged under before promotion
    pub fn tmp_key(&self) -> String {
        format!("{}.tmp", self.key)
    }
}

/// What startup hydration found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrateOutcome {
    Restored { counters: usize },
    Missing,
    Discarded { reason: String },
}

/// Result of one successful snapshot cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    pub counters: usize,
    pub size_bytes: usize,
}

enum SnapshotMessage {
    Shutdown { response_tx: oneshot::Sender<()> },
}

pub struct SnapshotManager<S: ObjectStore, C: Clock> {
    store: AggregationStore<C>,
    object_store: Arc<S>,
    config: SnapshotConfig,
}

impl<S: ObjectStore, C: Clock> SnapshotManager<S, C> {
    pub fn new(store: AggregationStore<C>, object_store: Arc<S>, config: SnapshotConfig) -> Self {
        SnapshotManager {
            store,
            object_store,
            config,
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Populate the store from the canonical snapshot, if one is usable.
    pub async fn hydrate(&self) -> HydrateOutcome {
        let bytes = match self.object_store.get(&self.config.key).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(key = %self.config.key, "no snapshot found, starting empty");
                return HydrateOutcome::Missing;
            }
            Err(e) => return self.discard(SnapshotError::Io(e)),
        };

        let restored = decode_snapshot(&bytes)
            .and_then(|image| image.restore(self.store.ladder()).map_err(SnapshotError::from));
        match restored {
            Ok(counters) => {
                let count = counters.len();
                self.store.restore(counters);
                info!(key = %self.config.key, counters = count, "store hydrated from snapshot");
                HydrateOutcome::Restored { counters: count }
            }
            Err(e) => self.discard(e),
        }
    }

    fn discard(&self, err: SnapshotError) -> HydrateOutcome {
        warn!(key = %self.config.key, error = %err, "snapshot unusable, starting empty");
        HydrateOutcome::Discarded {
            reason: err.to_string(),
        }
    }

    /// Copy the whole store under its write lock. Returns the image and the
    /// time it was taken.
    fn capture(&self) -> (StoreImage, i64) {
        let now = self.store.clock().now().as_secs();
        let image = self.store.with_exclusive(|map| StoreImage::capture(map, now));
        (image, now)
    }

    /// Write one complete image and promote it to the canonical key.
    pub async fn snapshot_once(&self) -> Result<SnapshotStats, SnapshotError> {
        let (image, now) = self.capture();
        let counters = image.counters.len();
        let bytes = encode_snapshot(&image, now, self.config.compression)?;

        let tmp_key = self.config.tmp_key();
        self.object_store.put(&tmp_key, &bytes).await?;
        self.object_store.rename(&tmp_key, &self.config.key).await?;

        Ok(SnapshotStats {
            counters,
            size_bytes: bytes.len(),
        })
    }

    async fn cycle(&self) {
        match self.snapshot_once().await {
            Ok(stats) => debug!(
                counters = stats.counters,
                bytes = stats.size_bytes,
                "snapshot written"
            ),
            Err(e) => error!(key = %self.config.key, error = %e, "snapshot cycle failed"),
        }
    }

    /// Spawn the periodic loop
    pub fn spawn(self) -> SnapshotWorkerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        SnapshotWorkerHandle { tx, task }
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<SnapshotMessage>) {
        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.cycle().await,
                msg = rx.recv() => {
                    self.cycle().await;
                    info!("snapshot worker shutting down");
                    if let Some(SnapshotMessage::Shutdown { response_tx }) = msg {
                        let _ = response_tx.send(());
                    }
                    break;
                }
            }
        }
    }
}

/// Handle to a running snapshot loop
pub struct SnapshotWorkerHandle {
    tx: mpsc::UnboundedSender<SnapshotMessage>,
    task: JoinHandle<()>,
}

impl SnapshotWorkerHandle {
    /// Stop the loop after one final snapshot
    pub async fn shutdown(self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .tx
            .send(SnapshotMessage::Shutdown { response_tx })
            .is_ok()
        {
            let _ = response_rx.await;
        }
        let _ = self.task.await;
    }
}
