//! Rolling window of fixed-width time buckets
//!
//! A `RollingWindow` keeps the `size` most recent contiguous intervals of
//! width `period`, stored in a circular array anchored to wall time:
//!
//! ```text
//!   slot (head - i) mod size  represents  [window_start - i*period, window_start - (i-1)*period)
//!   slot head                 represents  [window_start, window_start + period)
//! ```
//!
//! Intervals are inclusive at the start and exclusive at the end. Window
//! starts are aligned to multiples of `period` counted from the epoch.
//!
//! Samples newer than the head rotate the window forward (zeroing every slot
//! that is entered). Samples older than the head are written into the slot
//! whose interval contains them, as long as that slot is still retained;
//! anything older is dropped.

use super::types::{BucketData, Series};

/// Accumulated state of one time slot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bucket {
    pub sum: f64,
    pub count: u64,
    pub unique: u64,
}

impl Bucket {
    /// Add one sample's value
    #[inline]
    pub fn record(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    #[inline]
    fn clear(&mut self) {
        *self = Bucket::default();
    }
}

/// Where an `add` landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Written into the open bucket; `rotated` is true if the window moved first
    Head { rotated: bool },
    /// Written into a retained historical bucket, `steps_back` slots behind head
    Past { steps_back: usize },
    /// Older than the oldest retained interval; nothing was written
    Dropped,
}

/// Fixed-size circular array of buckets anchored to wall time
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    buckets: Vec<Bucket>,
    period: i64,
    head: usize,
    window_start: i64,
}

impl RollingWindow {
    /// Create an empty window; the head initially covers `[0, period)`.
    ///
    /// `period` and `size` are validated by the resolution ladder; values
    /// below one are raised to one.
    pub fn new(period: i64, size: usize) -> Self {
        debug_assert!(period > 0, "period must be positive");
        debug_assert!(size > 0, "window needs at least one bucket");
        RollingWindow {
            buckets: vec![Bucket::default(); size.max(1)],
            period: period.max(1),
            head: 0,
            window_start: 0,
        }
    }

    /// Rebuild a window from persisted parts, rejecting inconsistent state.
    pub fn from_parts(
        period: i64,
        head: usize,
        window_start: i64,
        buckets: Vec<Bucket>,
    ) -> Option<Self> {
        if period <= 0 || buckets.is_empty() || head >= buckets.len() {
            return None;
        }
        if window_start.rem_euclid(period) != 0 {
            return None;
        }
        Some(RollingWindow {
            buckets,
            period,
            head,
            window_start,
        })
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn head_index(&self) -> usize {
        self.head
    }

    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    /// Total time covered by all retained buckets
    pub fn span(&self) -> i64 {
        self.period.saturating_mul(self.buckets.len() as i64)
    }

    /// Buckets in storage order (not time order)
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn head_bucket(&self) -> &Bucket {
        &self.buckets[self.head]
    }

    pub fn head_bucket_mut(&mut self) -> &mut Bucket {
        &mut self.buckets[self.head]
    }

    /// Apply `contribute` to the bucket whose interval contains `t`.
    pub fn add<F>(&mut self, t: i64, contribute: F) -> Placement
    where
        F: FnOnce(&mut Bucket),
    {
        if t >= self.window_start {
            let rotated = self.advance_to(t);
            contribute(&mut self.buckets[self.head]);
            return Placement::Head { rotated };
        }

        let size = self.buckets.len();
        for steps_back in 1..size {
            let slot_start = self.window_start - self.period * steps_back as i64;
            if slot_start <= t {
                let index = (self.head + size - steps_back) % size;
                contribute(&mut self.buckets[index]);
                return Placement::Past { steps_back };
            }
        }
        Placement::Dropped
    }

    /// Rotate forward until the head interval contains `now`.
    ///
    /// Returns true if the window moved. Times at or before the current head
    /// leave the window untouched.
    pub fn roll_to(&mut self, now: i64) -> bool {
        if now < self.window_start {
            return false;
        }
        self.advance_to(now)
    }

    fn advance_to(&mut self, t: i64) -> bool {
        if self.window_start + self.period - 1 >= t {
            return false;
        }
        let steps = t.saturating_sub(self.window_start) / self.period;
        let size = self.buckets.len();

        if steps >= size as i64 {
            // Every retained interval is stale.
            self.buckets.iter_mut().for_each(Bucket::clear);
            self.head = (self.head + (steps % size as i64) as usize) % size;
        } else {
            for _ in 0..steps {
                self.head = (self.head + 1) % size;
                self.buckets[self.head].clear();
            }
        }
        self.window_start += steps * self.period;
        true
    }

    /// Newest-first buckets tagged with their interval start.
    ///
    /// Stops before the first interval that would start before the epoch.
    pub fn iter(&self) -> impl Iterator<Item = BucketData> + '_ {
        let size = self.buckets.len();
        (0..size).map_while(move |i| {
            let time = self.window_start - self.period * i as i64;
            if time < 0 {
                return None;
            }
            let bucket = &self.buckets[(self.head + size - i) % size];
            Some(BucketData {
                time,
                sum: bucket.sum,
                count: bucket.count,
                unique: bucket.unique,
            })
        })
    }

    pub fn data(&self) -> Series {
        self.iter().collect()
    }
}
