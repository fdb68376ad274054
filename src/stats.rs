//! Rolling timing statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Number of samples each store keeps
pub(crate) const MEAN_TIMING_STATS_CACHE_SIZE: usize = 100;

const EMPTY: u64 = u64::MAX;

/// Fixed-size ring of the most recent samples of one metric, in milliseconds.
///
/// Writers are serialized; readers see a possibly half-updated ring, which
/// only nudges the mean.
pub(crate) struct StatsStore {
    values: Box<[AtomicU64]>,
    index: Mutex<usize>,
}

impl StatsStore {
    pub fn new(size: usize) -> Self {
        Self {
            values: (0..size.max(1)).map(|_| AtomicU64::new(EMPTY)).collect(),
            index: Mutex::new(0),
        }
    }

    pub fn add(&self, sample: Duration) {
        let millis = u64::try_from(sample.as_millis()).unwrap_or(EMPTY - 1);
        let mut index = self.index.lock();
        self.values[*index].store(millis, Ordering::Relaxed);
        *index = (*index + 1) % self.values.len();
    }

    /// Mean over the populated slots, rounded to whole milliseconds.
    pub fn mean(&self) -> Duration {
        let mut mean = 0.0_f64;
        let mut counter = 0_u32;
        for slot in self.values.iter() {
            let value = slot.load(Ordering::Relaxed);
            if value != EMPTY {
                counter += 1;
                let n = f64::from(counter);
                mean = mean * ((n - 1.0) / n) + value as f64 / n;
            }
        }
        Duration::from_millis(mean.round() as u64)
    }
}

/// Timing statistics shared by the pool
pub(crate) struct PoolStats {
    pub active_times: StatsStore,
    pub idle_times: StatsStore,
    pub wait_times: StatsStore,
    max_borrow_wait_millis: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self {
            active_times: StatsStore::new(MEAN_TIMING_STATS_CACHE_SIZE),
            idle_times: StatsStore::new(MEAN_TIMING_STATS_CACHE_SIZE),
            wait_times: StatsStore::new(MEAN_TIMING_STATS_CACHE_SIZE),
            max_borrow_wait_millis: AtomicU64::new(0),
        }
    }

    pub fn record_borrow(&self, idle_time: Duration, wait_time: Duration) {
        self.idle_times.add(idle_time);
        self.wait_times.add(wait_time);
        let millis = u64::try_from(wait_time.as_millis()).unwrap_or(u64::MAX);
        self.max_borrow_wait_millis.fetch_max(millis, Ordering::Relaxed);
    }

    pub fn record_return(&self, active_time: Duration) {
        self.active_times.add(active_time);
    }

    pub fn max_borrow_wait(&self) -> Duration {
        Duration::from_millis(self.max_borrow_wait_millis.load(Ordering::Relaxed))
    }
}
