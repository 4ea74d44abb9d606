//! Durable counter store
//!
//! Every counter lives as its own record in an `ObjectStore` under
//! `counters/<ns>/<name>`. Nothing is cached: each operation loads the
//! record, rolls every window forward to now, applies the change and writes
//! the record back.
//!
//! Query mutates stored state. Rolling a window forward on read is written
//! back, so operations are serialized behind one async mutex. Querying a
//! counter that was never submitted returns a zeroed series and writes
//! nothing.

use super::backend::{validate_key, BackendFuture, CounterBackend, Submission, DEFAULT_SKEW_WINDOW_SECS};
use super::error::StoreError;
use super::key_encoder::CounterKeyEncoder;
use super::memory::unknown_resolution;
use crate::aggregation::{CounterKey, MeterSet, RangeHint, ResolutionLadder, Sample, Series, Timestamp};
use crate::clock::{Clock, SystemClock};
use crate::persistence::{CounterRecord, ObjectStore, RecordError};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct DurableStore<S: ObjectStore, C: Clock = SystemClock> {
    objects: Arc<S>,
    ladder: Arc<ResolutionLadder>,
    clock: C,
    skew_window: i64,
    lock: Mutex<()>,
}

impl<S: ObjectStore> DurableStore<S, SystemClock> {
    pub fn new(objects: Arc<S>, ladder: Arc<ResolutionLadder>) -> Self {
        Self::with_clock(objects, ladder, SystemClock::new())
    }
}

impl<S: ObjectStore, C: Clock> DurableStore<S, C> {
    pub fn with_clock(objects: Arc<S>, ladder: Arc<ResolutionLadder>, clock: C) -> Self {
        DurableStore {
            objects,
            ladder,
            clock,
            skew_window: DEFAULT_SKEW_WINDOW_SECS,
            lock: Mutex::new(()),
        }
    }

    pub fn with_skew_window(mut self, secs: i64) -> Self {
        self.skew_window = secs;
        self
    }

    pub fn ladder(&self) -> &Arc<ResolutionLadder> {
        &self.ladder
    }

    pub async fn submit(&self, submission: &Submission<'_>) -> Result<Timestamp, StoreError> {
        submission.validate()?;
        let key = CounterKey::new(submission.namespace, submission.name);
        let record_key = CounterKeyEncoder::encode(&key.namespace, &key.name);

        let _guard = self.lock.lock().await;
        let now = self.clock.now();
        let timestamp = submission.effective_timestamp(now, self.skew_window);

        let mut set = match self.load(&record_key, &key).await? {
            Some(set) => set,
            None => MeterSet::new(Arc::clone(&self.ladder)),
        };
        set.roll_to(now.as_secs());
        set.submit(&Sample::new(timestamp, submission.value, submission.sender));
        self.save(&record_key, &key, &set, now).await?;
        Ok(timestamp)
    }

    pub async fn query(
        &self,
        namespace: &str,
        name: &str,
        hint: &RangeHint,
    ) -> Result<Series, StoreError> {
        validate_key(namespace, name)?;
        if self.ladder.select(hint).is_none() {
            return Err(unknown_resolution(hint));
        }
        let key = CounterKey::new(namespace, name);
        let record_key = CounterKeyEncoder::encode(namespace, name);

        let _guard = self.lock.lock().await;
        let now = self.clock.now();

        let series = match self.load(&record_key, &key).await? {
            Some(mut set) => {
                set.roll_to(now.as_secs());
                self.save(&record_key, &key, &set, now).await?;
                set.query(hint)
            }
            None => {
                let mut empty = MeterSet::new(Arc::clone(&self.ladder));
                empty.roll_to(now.as_secs());
                empty.query(hint)
            }
        };
        series.ok_or_else(|| unknown_resolution(hint))
    }

    /// Counter names in `namespace`, lexicographically ordered
    pub async fn list(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let prefix = CounterKeyEncoder::namespace_prefix(namespace);
        let _guard = self.lock.lock().await;
        let keys = self.objects.list(&prefix).await?;

        let mut names: Vec<String> = keys
            .iter()
            .filter_map(|k| CounterKeyEncoder::decode(k))
            .filter(|key| key.namespace == namespace)
            .map(|key| key.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Last access time stored for a counter, if it exists
    pub async fn accessed_at(&self, namespace: &str, name: &str) -> Result<Option<Timestamp>, StoreError> {
        let record_key = CounterKeyEncoder::encode(namespace, name);
        let _guard = self.lock.lock().await;
        match self.objects.get(&record_key).await {
            Ok(bytes) => CounterRecord::decode(&bytes)
                .map(|record| Some(Timestamp::from_secs(record.accessed_at)))
                .map_err(|source| StoreError::Record {
                    key: record_key,
                    source,
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, record_key: &str, key: &CounterKey) -> Result<Option<MeterSet>, StoreError> {
        let bytes = match self.objects.get(record_key).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let corrupt = |source| StoreError::Record {
            key: record_key.to_string(),
            source,
        };

        let record = CounterRecord::decode(&bytes).map_err(corrupt)?;
        let elapsed = self.clock.elapsed_secs(Timestamp::from_secs(record.accessed_at));
        let (stored_key, set) = record.into_set(&self.ladder).map_err(corrupt)?;
        if &stored_key != key {
            return Err(corrupt(RecordError(format!(
                "record holds {}, expected {}",
                stored_key, key
            ))));
        }
        debug!(key = %key, idle_secs = elapsed, "counter record loaded");
        Ok(Some(set))
    }

    async fn save(
        &self,
        record_key: &str,
        key: &CounterKey,
        set: &MeterSet,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let bytes = CounterRecord::from_set(key, set, now.as_secs())
            .encode()
            .map_err(|source| StoreError::Record {
                key: record_key.to_string(),
                source,
            })?;
        let tmp_key = format!("{}.tmp", record_key);
        self.objects.put(&tmp_key, &bytes).await?;
        self.objects.rename(&tmp_key, record_key).await?;
        Ok(())
    }
}

impl<S: ObjectStore, C: Clock> CounterBackend for DurableStore<S, C> {
    fn submit<'a>(&'a self, submission: Submission<'a>) -> BackendFuture<'a, Timestamp> {
        Box::pin(async move { DurableStore::submit(self, &submission).await })
    }

    fn query<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        hint: &'a RangeHint,
    ) -> BackendFuture<'a, Series> {
        Box::pin(async move { DurableStore::query(self, namespace, name, hint).await })
    }

    fn list<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, Vec<String>> {
        Box::pin(async move { DurableStore::list(self, namespace).await })
    }
}
