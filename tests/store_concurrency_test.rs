//! Concurrency tests for the in-memory store
//!
//! Many threads hammer the same counters through clones of one store. No
//! sample may be lost and every resolution must agree on the totals.

use incr::aggregation::{RangeHint, ResolutionLadder};
use incr::clock::SimulatedClock;
use incr::store::{AggregationStore, Submission};
use std::sync::Arc;
use std::thread;

const NOW: i64 = 1_700_000_000;

fn store() -> AggregationStore<SimulatedClock> {
    AggregationStore::with_clock(Arc::new(ResolutionLadder::default()), SimulatedClock::new(NOW))
}

fn hint(s: &str) -> RangeHint {
    s.parse().unwrap()
}

#[test]
fn test_parallel_submits_are_all_counted() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 1_000;

    let store = store();
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    store.submit(&Submission::new("load", "hits", 1.0)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (THREADS * PER_THREAD) as u64;
    for name in ["total", "live", "hourly", "daily", "weekly"] {
        let series = store.query("load", "hits", &hint(name)).unwrap();
        assert_eq!(series[0].count, expected, "resolution {}", name);
        assert_eq!(series[0].sum, expected as f64, "resolution {}", name);
    }
}

#[test]
fn test_parallel_submits_across_counters() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 250;

    let store = store();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                let own = format!("worker-{}", t);
                for i in 0..PER_THREAD {
                    store.submit(&Submission::new("load", &own, 2.0)).unwrap();
                    store.submit(&Submission::new("load", "shared", 1.0)).unwrap();
                    if i % 50 == 0 {
                        // Readers interleave with writers
                        store.query("load", "shared", &RangeHint::Total).unwrap();
                        store.list("load");
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let names = store.list("load");
    assert_eq!(names.len(), THREADS + 1);
    assert_eq!(names.last().map(String::as_str), Some("worker-5"));

    for t in 0..THREADS {
        let series = store
            .query("load", &format!("worker-{}", t), &RangeHint::Total)
            .unwrap();
        assert_eq!(series[0].count, PER_THREAD as u64);
        assert_eq!(series[0].sum, 2.0 * PER_THREAD as f64);
    }
    let shared = store.query("load", "shared", &RangeHint::Total).unwrap();
    assert_eq!(shared[0].count, (THREADS * PER_THREAD) as u64);
}

#[test]
fn test_parallel_senders_estimate_distinct_count() {
    const THREADS: usize = 4;
    const SENDERS: usize = 200;

    let store = store();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                // Every thread sends for every sender, in a different order
                for i in 0..SENDERS {
                    let sender = format!("sender-{}", (i + t * 37) % SENDERS);
                    store
                        .submit(&Submission::new("load", "visits", 1.0).with_sender(&sender))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for name in ["daily", "weekly"] {
        let head = store.query("load", "visits", &hint(name)).unwrap()[0];
        assert_eq!(head.count, (THREADS * SENDERS) as u64);
        let error = (head.unique as f64 - SENDERS as f64).abs() / SENDERS as f64;
        assert!(
            error < 0.1,
            "{}: estimated {} distinct senders for {}",
            name,
            head.unique,
            SENDERS
        );
    }
}

#[test]
fn test_time_moves_while_submitting() {
    let clock = SimulatedClock::new(NOW);
    let store = AggregationStore::with_clock(Arc::new(ResolutionLadder::default()), clock.clone());

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                store.submit(&Submission::new("load", "ticks", 1.0)).unwrap();
            }
        })
    };
    for _ in 0..50 {
        clock.advance(1);
    }
    writer.join().unwrap();

    let total = store.query("load", "ticks", &RangeHint::Total).unwrap();
    assert_eq!(total[0].count, 500);
    // All 500 samples fall within the 100 second live window
    let live: u64 = store
        .query("load", "ticks", &hint("live"))
        .unwrap()
        .iter()
        .map(|b| b.count)
        .sum();
    assert_eq!(live, 500);
}
