//! Policy engine for circuit breaker trip decisions.

use crate::window::WindowStats;

/// Decides, from the current window, whether a closed circuit should open.
///
/// Policies are consulted under the breaker's state lock right after a
/// failure has been recorded, so they must be cheap and must not block.
pub trait BreakerPolicy: Send + Sync + 'static {
    /// Determines if the circuit should trip open based on current stats.
    fn should_trip(&self, stats: &WindowStats) -> bool;
}

/// Trips once the failure ratio reaches a threshold, but only after the
/// window holds a minimum number of calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureRatePolicy {
    failure_threshold: f64,
    minimum_request_volume: u64,
}

impl FailureRatePolicy {
    /// Creates a new failure-rate policy.
    pub fn new(failure_threshold: f64, minimum_request_volume: u64) -> Self {
        Self {
            failure_threshold,
            minimum_request_volume,
        }
    }
}

impl BreakerPolicy for FailureRatePolicy {
    fn should_trip(&self, stats: &WindowStats) -> bool {
        stats.total >= self.minimum_request_volume
            && stats.failures > 0
            && stats.error_rate() >= self.failure_threshold
    }
}

/// Trips once the window holds a fixed number of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCountPolicy {
    failures: u64,
}

impl FailureCountPolicy {
    /// Creates a policy that trips at `failures` failures within the window.
    pub fn new(failures: u64) -> Self {
        Self {
            failures: failures.max(1),
        }
    }
}

impl BreakerPolicy for FailureCountPolicy {
    fn should_trip(&self, stats: &WindowStats) -> bool {
        stats.failures >= self.failures
    }
}
