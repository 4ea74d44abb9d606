//! In-memory aggregation store
//!
//! One ordered map of counter key to `MeterSet` behind one reader/writer lock.
//! Submits take the write lock for the full fan-out of one sample, so a
//! sample is either in every resolution or in none. Queries take the read
//! lock and roll a copy of the selected meter to now; stored windows only
//! rotate on submit. Clones share the same map.

use super::backend::{validate_key, BackendFuture, CounterBackend, Submission, DEFAULT_SKEW_WINDOW_SECS};
use super::error::StoreError;
use crate::aggregation::{CounterKey, MeterSet, RangeHint, ResolutionLadder, Sample, Series, Timestamp};
use crate::clock::{Clock, SystemClock};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type CounterMap = BTreeMap<CounterKey, MeterSet>;

#[derive(Clone)]
pub struct AggregationStore<C: Clock = SystemClock> {
    counters: Arc<RwLock<CounterMap>>,
    ladder: Arc<ResolutionLadder>,
    clock: C,
    skew_window: i64,
}

impl AggregationStore<SystemClock> {
    pub fn new(ladder: Arc<ResolutionLadder>) -> Self {
        Self::with_clock(ladder, SystemClock::new())
    }
}

impl<C: Clock> AggregationStore<C> {
    pub fn with_clock(ladder: Arc<ResolutionLadder>, clock: C) -> Self {
        AggregationStore {
            counters: Arc::new(RwLock::new(BTreeMap::new())),
            ladder,
            clock,
            skew_window: DEFAULT_SKEW_WINDOW_SECS,
        }
    }

    pub fn with_skew_window(mut self, secs: i64) -> Self {
        self.skew_window = secs;
        self
    }

    pub fn ladder(&self) -> &Arc<ResolutionLadder> {
        &self.ladder
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Record one sample, creating the counter on first use.
    pub fn submit(&self, submission: &Submission<'_>) -> Result<Timestamp, StoreError> {
        submission.validate()?;
        let timestamp = submission.effective_timestamp(self.clock.now(), self.skew_window);
        let sample = Sample::new(timestamp, submission.value, submission.sender);

        let mut counters = self.counters.write();
        let key = CounterKey::new(submission.namespace, submission.name);
        counters
            .entry(key)
            .or_insert_with(|| MeterSet::new(Arc::clone(&self.ladder)))
            .submit(&sample);
        Ok(timestamp)
    }

    /// Series for one counter as of now. Windows are rolled on a copy, so
    /// the stored counter is untouched; an unseen counter reads as a zeroed
    /// series and nothing is created.
    pub fn query(&self, namespace: &str, name: &str, hint: &RangeHint) -> Result<Series, StoreError> {
        validate_key(namespace, name)?;
        let key = CounterKey::new(namespace, name);

        let now = self.clock.now().as_secs();

        let series = match self.counters.read().get(&key) {
            Some(set) => set.query_at(hint, now),
            None => MeterSet::new(Arc::clone(&self.ladder)).query_at(hint, now),
        };
        series.ok_or_else(|| unknown_resolution(hint))
    }

    /// Counter names in `namespace`, lexicographically ordered
    pub fn list(&self, namespace: &str) -> Vec<String> {
        let start = CounterKey::new(namespace, "");
        self.counters
            .read()
            .range(start..)
            .take_while(|(key, _)| key.namespace == namespace)
            .map(|(key, _)| key.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty()
    }

    /// Run `f` over the whole map while holding the write lock.
    ///
    /// No submit or query can interleave with `f`.
    pub fn with_exclusive<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&CounterMap) -> R,
    {
        let counters = self.counters.write();
        f(&counters)
    }

    /// Replace the whole map, e.g. after hydrating from a snapshot.
    pub fn restore(&self, counters: CounterMap) {
        *self.counters.write() = counters;
    }
}

pub(crate) fn unknown_resolution(hint: &RangeHint) -> StoreError {
    match hint {
        RangeHint::Resolution(name) => StoreError::UnknownResolution(name.clone()),
        other => StoreError::UnknownResolution(format!("{:?}", other)),
    }
}

impl<C: Clock> CounterBackend for AggregationStore<C> {
    fn submit<'a>(&'a self, submission: Submission<'a>) -> BackendFuture<'a, Timestamp> {
        Box::pin(async move { AggregationStore::submit(self, &submission) })
    }

    fn query<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        hint: &'a RangeHint,
    ) -> BackendFuture<'a, Series> {
        Box::pin(async move { AggregationStore::query(self, namespace, name, hint) })
    }

    fn list<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(AggregationStore::list(self, namespace)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::BucketData;
    use crate::clock::SimulatedClock;

    const NOW: i64 = 1_700_000_000;

    fn store() -> (AggregationStore<SimulatedClock>, SimulatedClock) {
        let clock = SimulatedClock::new(NOW);
        let store = AggregationStore::with_clock(Arc::new(ResolutionLadder::default()), clock.clone());
        (store, clock)
    }

    #[test]
    fn test_submit_creates_counter_once() {
        let (store, _) = store();
        store.submit(&Submission::new("web", "views", 1.0)).unwrap();
        store.submit(&Submission::new("web", "views", 2.0)).unwrap();

        assert_eq!(store.len(), 1);
        let total = store.query("web", "views", &RangeHint::Total).unwrap();
        assert_eq!(total, vec![BucketData { time: 0, sum: 3.0, count: 2, unique: 0 }]);
    }

    #[test]
    fn test_explicit_timestamp_within_skew_is_used() {
        let (store, _) = store();
        let backfill = Timestamp::from_secs(NOW - 3_600);
        let used = store
            .submit(&Submission::new("web", "views", 1.0).at(backfill))
            .unwrap();
        assert_eq!(used, backfill);

        let far = Timestamp::from_secs(NOW - 10 * 86_400);
        let used = store.submit(&Submission::new("web", "views", 1.0).at(far)).unwrap();
        assert_eq!(used, Timestamp::from_secs(NOW));
    }

    #[test]
    fn test_invalid_submission_mutates_nothing() {
        let (store, _) = store();
        assert!(store.submit(&Submission::new("web", "views", f64::INFINITY)).is_err());
        assert!(store.submit(&Submission::new("", "views", 1.0)).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_counter_reads_as_zeroed_series() {
        let (store, _) = store();
        let live = store.query("web", "missing", &"live".parse().unwrap()).unwrap();
        assert_eq!(live.len(), 10);
        assert_eq!(live[0].time, NOW);
        assert!(live.iter().all(|b| b.count == 0 && b.sum == 0.0));

        let total = store.query("web", "missing", &RangeHint::Total).unwrap();
        assert_eq!(total, vec![BucketData::default()]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_resolution_is_an_error() {
        let (store, _) = store();
        store.submit(&Submission::new("web", "views", 1.0)).unwrap();
        assert!(matches!(
            store.query("web", "views", &"monthly".parse().unwrap()),
            Err(StoreError::UnknownResolution(name)) if name == "monthly"
        ));
        assert!(matches!(
            store.query("web", "missing", &"monthly".parse().unwrap()),
            Err(StoreError::UnknownResolution(_))
        ));
    }

    #[test]
    fn test_list_is_lexicographic_and_scoped() {
        let (store, _) = store();
        for name in ["qux", "bar", "baz"] {
            store.submit(&Submission::new("foo", name, 1.0)).unwrap();
        }
        store.submit(&Submission::new("fo", "zzz", 1.0)).unwrap();
        store.submit(&Submission::new("foo2", "aaa", 1.0)).unwrap();

        assert_eq!(store.list("foo"), vec!["bar", "baz", "qux"]);
        assert_eq!(store.list("fo"), vec!["zzz"]);
        assert!(store.list("nope").is_empty());
    }

    #[test]
    fn test_query_is_a_pure_read() {
        let (store, clock) = store();
        store.submit(&Submission::new("web", "views", 1.0)).unwrap();
        let stored = store.with_exclusive(|map| map.clone());
        clock.advance(1_000);

        let first = store.query("web", "views", &"live".parse().unwrap()).unwrap();
        let second = store.query("web", "views", &"live".parse().unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.with_exclusive(|map| map.clone()), stored);
    }

    #[test]
    fn test_known_and_unknown_counters_share_the_head_after_idle() {
        let (store, clock) = store();
        store.submit(&Submission::new("web", "views", 5.0)).unwrap();
        clock.advance(3_600);

        let live: RangeHint = "live".parse().unwrap();
        let known = store.query("web", "views", &live).unwrap();
        let unknown = store.query("web", "nobody", &live).unwrap();
        assert_eq!(known[0].time, NOW + 3_600);
        assert_eq!(known, unknown);
        assert!(known.iter().all(|bucket| bucket.count == 0));

        // Older history is still there for wider resolutions.
        let hourly = store.query("web", "views", &"hourly".parse().unwrap()).unwrap();
        assert_eq!(hourly.iter().map(|b| b.sum).sum::<f64>(), 5.0);
        assert_eq!(
            store.query("web", "views", &RangeHint::Total).unwrap()[0].sum,
            5.0
        );
    }

    #[test]
    fn test_clones_share_state() {
        let (store, _) = store();
        let other = store.clone();
        other.submit(&Submission::new("web", "views", 1.0)).unwrap();
        assert_eq!(store.list("web"), vec!["views"]);
    }

    #[test]
    fn test_uniques_through_store() {
        let (store, _) = store();
        for sender in ["a", "b", "a", "c"] {
            store
                .submit(&Submission::new("web", "visits", 1.0).with_sender(sender))
                .unwrap();
        }
        let daily = store.query("web", "visits", &"daily".parse().unwrap()).unwrap();
        assert_eq!(daily[0].count, 4);
        assert_eq!(daily[0].unique, 3);
    }
}
