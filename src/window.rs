//! Rolling outcome statistics for circuit breakers.

use smallvec::SmallVec;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How far back a breaker looks when evaluating its trip policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// The last `n` recorded calls.
    Count(usize),

    /// Calls recorded within the last `duration`, kept in `buckets` slices.
    Time {
        /// Length of the window.
        duration: Duration,
        /// Number of buckets the window is split into.
        buckets: u32,
    },
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::Time {
            duration: Duration::from_secs(10),
            buckets: 10,
        }
    }
}

/// Aggregated counts over the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    /// Calls counted in the window.
    pub total: u64,
    /// Failed calls counted in the window.
    pub failures: u64,
}

impl WindowStats {
    /// Successful calls in the window.
    pub fn successes(&self) -> u64 {
        self.total - self.failures
    }

    /// Failure ratio in `[0, 1]`; zero for an empty window.
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        self.failures as f64 / self.total as f64
    }
}

/// A window of recent call outcomes.
///
/// Not synchronized: a breaker only touches its window while holding its
/// state lock.
#[derive(Debug)]
pub enum RollingWindow {
    /// Fixed number of most recent outcomes.
    Count(CountWindow),
    /// Outcomes within a sliding time span.
    Time(TimeWindow),
}

impl RollingWindow {
    /// Creates an empty window for the given policy.
    pub fn new(policy: WindowPolicy) -> Self {
        match policy {
            WindowPolicy::Count(size) => RollingWindow::Count(CountWindow::new(size)),
            WindowPolicy::Time { duration, buckets } => {
                RollingWindow::Time(TimeWindow::new(duration, buckets))
            }
        }
    }

    /// Records one outcome observed at `now`.
    pub fn record(&mut self, failed: bool, now: Instant) {
        match self {
            RollingWindow::Count(window) => window.record(failed),
            RollingWindow::Time(window) => window.record(failed, now),
        }
    }

    /// Counts over the window as of `now`.
    pub fn stats(&mut self, now: Instant) -> WindowStats {
        match self {
            RollingWindow::Count(window) => window.stats(),
            RollingWindow::Time(window) => window.stats(now),
        }
    }

    /// Forgets everything recorded so far.
    pub fn reset(&mut self) {
        match self {
            RollingWindow::Count(window) => window.reset(),
            RollingWindow::Time(window) => window.reset(),
        }
    }
}

/// Ring of the last `size` outcomes (`true` = failure).
#[derive(Debug)]
pub struct CountWindow {
    outcomes: VecDeque<bool>,
    size: usize,
    failures: u64,
}

impl CountWindow {
    fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            outcomes: VecDeque::with_capacity(size),
            size,
            failures: 0,
        }
    }

    fn record(&mut self, failed: bool) {
        if self.outcomes.len() == self.size {
            if let Some(true) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }

        self.outcomes.push_back(failed);
        if failed {
            self.failures += 1;
        }
    }

    fn stats(&self) -> WindowStats {
        WindowStats {
            total: self.outcomes.len() as u64,
            failures: self.failures,
        }
    }

    fn reset(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Instant,
    successes: u64,
    failures: u64,
}

/// Time window split into fixed-width buckets.
#[derive(Debug)]
pub struct TimeWindow {
    buckets: SmallVec<[Bucket; 16]>,
    window_size: Duration,
    bucket_size: Duration,
}

impl TimeWindow {
    fn new(window_size: Duration, bucket_count: u32) -> Self {
        let bucket_size = window_size / bucket_count.max(1);
        Self {
            buckets: SmallVec::new(),
            window_size,
            bucket_size,
        }
    }

    fn record(&mut self, failed: bool, now: Instant) {
        self.evict(now);

        if let Some(bucket) = self.buckets.last_mut() {
            if now.saturating_duration_since(bucket.start) < self.bucket_size {
                if failed {
                    bucket.failures += 1;
                } else {
                    bucket.successes += 1;
                }
                return;
            }
        }

        self.buckets.push(Bucket {
            start: now,
            successes: u64::from(!failed),
            failures: u64::from(failed),
        });
    }

    fn stats(&mut self, now: Instant) -> WindowStats {
        self.evict(now);

        self.buckets
            .iter()
            .fold(WindowStats::default(), |acc, bucket| WindowStats {
                total: acc.total + bucket.successes + bucket.failures,
                failures: acc.failures + bucket.failures,
            })
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }

    fn evict(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window_size) else {
            return;
        };

        // Buckets are appended in time order, so expired ones form a prefix.
        let expired = self
            .buckets
            .iter()
            .take_while(|bucket| bucket.start + self.bucket_size <= cutoff)
            .count();
        if expired > 0 {
            self.buckets.drain(..expired);
        }
    }
}
