//! Configuration for circuit breakers.

use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, FailureKind};
use crate::metrics::{MetricSink, NullMetricSink};
use crate::policy::{BreakerPolicy, FailureCountPolicy, FailureRatePolicy};
use crate::registry::OperationId;
use crate::window::WindowPolicy;

/// Which rule decides that a closed circuit should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TripPolicy {
    /// Failure ratio over the window, once the minimum volume is reached.
    #[default]
    FailureRate,

    /// A fixed number of failures within the window.
    FailureCount(u64),
}

/// Set of failure kinds that count against a breaker's window.
///
/// Failures of an uncounted kind still produce a fallback result; they are
/// only left out of the trip decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureKinds {
    mask: u8,
}

impl FailureKinds {
    /// Every kind counts. This is the default.
    pub const fn all() -> Self {
        Self { mask: 0b1111 }
    }

    /// No kind counts.
    pub const fn none() -> Self {
        Self { mask: 0 }
    }

    /// Adds a kind to the set.
    pub const fn with(self, kind: FailureKind) -> Self {
        Self {
            mask: self.mask | kind.bit(),
        }
    }

    /// Removes a kind from the set.
    pub const fn without(self, kind: FailureKind) -> Self {
        Self {
            mask: self.mask & !kind.bit(),
        }
    }

    /// Whether failures of `kind` count against the window.
    pub const fn contains(&self, kind: FailureKind) -> bool {
        self.mask & kind.bit() != 0
    }
}

impl Default for FailureKinds {
    fn default() -> Self {
        Self::all()
    }
}

/// Tunables of a single breaker.
///
/// Defaults: 50% failure rate, a minimum of 20 calls in a 10 second window
/// of 10 buckets, 5 seconds in the open state, 1 second per call.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Failure ratio in `(0, 1]` at or above which the circuit opens.
    pub failure_rate_threshold: f64,
    /// Calls the window must hold before the failure ratio is evaluated.
    pub minimum_request_volume: u64,
    /// Size or span of the rolling window.
    pub window: WindowPolicy,
    /// Rule that turns window statistics into a trip decision.
    pub trip_policy: TripPolicy,
    /// Time spent open before a trial call is let through.
    pub reset_timeout: Duration,
    /// Upper bound on a single protected call.
    pub call_timeout: Duration,
    /// Failure kinds that count against the window.
    pub counted_failures: FailureKinds,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_request_volume: 20,
            window: WindowPolicy::default(),
            trip_policy: TripPolicy::FailureRate,
            reset_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(1),
            counted_failures: FailureKinds::all(),
        }
    }
}

impl BreakerConfig {
    /// Sets the failure ratio that trips the circuit.
    pub fn with_failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = threshold;
        self
    }

    /// Sets the minimum number of calls before the failure ratio is evaluated.
    pub fn with_minimum_request_volume(mut self, volume: u64) -> Self {
        self.minimum_request_volume = volume;
        self
    }

    /// Sets the rolling window.
    pub fn with_window(mut self, window: WindowPolicy) -> Self {
        self.window = window;
        self
    }

    /// Sets the trip rule.
    pub fn with_trip_policy(mut self, policy: TripPolicy) -> Self {
        self.trip_policy = policy;
        self
    }

    /// Sets how long the circuit stays open before a trial.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets which failure kinds count against the window.
    pub fn with_counted_failures(mut self, kinds: FailureKinds) -> Self {
        self.counted_failures = kinds;
        self
    }

    /// Checks that every option is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.failure_rate_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::FailureRateThreshold(threshold));
        }

        match self.window {
            WindowPolicy::Count(0) => return Err(ConfigError::EmptyWindow),
            WindowPolicy::Time { duration, .. } if duration.is_zero() => {
                return Err(ConfigError::ZeroDuration("window"));
            }
            WindowPolicy::Time { buckets: 0, .. } => return Err(ConfigError::ZeroBuckets),
            _ => {}
        }

        if let TripPolicy::FailureCount(0) = self.trip_policy {
            return Err(ConfigError::ZeroFailureCount);
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("call_timeout"));
        }

        Ok(())
    }

    /// Builds the trip policy this configuration describes.
    pub fn policy(&self) -> Box<dyn BreakerPolicy> {
        match self.trip_policy {
            TripPolicy::FailureRate => Box::new(FailureRatePolicy::new(
                self.failure_rate_threshold,
                self.minimum_request_volume,
            )),
            TripPolicy::FailureCount(failures) => Box::new(FailureCountPolicy::new(failures)),
        }
    }
}

/// Builder for creating standalone circuit breakers.
pub struct BreakerBuilder {
    operation: OperationId,
    config: BreakerConfig,
    policy: Option<Box<dyn BreakerPolicy>>,
    metric_sink: Arc<dyn MetricSink>,
    clock: Arc<dyn Clock>,
}

impl BreakerBuilder {
    /// Creates a new builder with default settings.
    pub fn new(operation: OperationId) -> Self {
        Self {
            operation,
            config: BreakerConfig::default(),
            policy: None,
            metric_sink: Arc::new(NullMetricSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the failure rate threshold that will trip the circuit.
    pub fn failure_threshold(mut self, threshold: f64) -> Self {
        self.config.failure_rate_threshold = threshold;
        self
    }

    /// Sets the minimum number of calls required before considering the error rate.
    pub fn min_request_volume(mut self, volume: u64) -> Self {
        self.config.minimum_request_volume = volume;
        self
    }

    /// Sets the rolling window.
    pub fn window(mut self, window: WindowPolicy) -> Self {
        self.config.window = window;
        self
    }

    /// Trips after `failures` failures within the window instead of by rate.
    pub fn failure_count(mut self, failures: u64) -> Self {
        self.config.trip_policy = TripPolicy::FailureCount(failures);
        self
    }

    /// Sets how long the circuit stays open before a trial call.
    pub fn reset_timeout(mut self, duration: Duration) -> Self {
        self.config.reset_timeout = duration;
        self
    }

    /// Sets the per-call timeout.
    pub fn call_timeout(mut self, duration: Duration) -> Self {
        self.config.call_timeout = duration;
        self
    }

    /// Sets which failure kinds count against the window.
    pub fn counted_failures(mut self, kinds: FailureKinds) -> Self {
        self.config.counted_failures = kinds;
        self
    }

    /// Uses a custom trip policy, overriding `trip_policy` from the config.
    pub fn policy<P: BreakerPolicy>(mut self, policy: P) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Sets a metric sink for the circuit breaker.
    pub fn metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration and builds the breaker.
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        self.config.validate()?;

        let policy = match self.policy {
            Some(policy) => policy,
            None => self.config.policy(),
        };

        Ok(CircuitBreaker::new(
            self.operation,
            self.config,
            policy,
            self.metric_sink,
            self.clock,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(BreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config = BreakerConfig::default().with_failure_rate_threshold(0.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::FailureRateThreshold(0.0))
        );

        let config = BreakerConfig::default().with_failure_rate_threshold(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_windows() {
        let config = BreakerConfig::default().with_window(WindowPolicy::Count(0));
        assert_eq!(config.validate(), Err(ConfigError::EmptyWindow));

        let config = BreakerConfig::default().with_window(WindowPolicy::Time {
            duration: Duration::from_secs(1),
            buckets: 0,
        });
        assert_eq!(config.validate(), Err(ConfigError::ZeroBuckets));

        let config = BreakerConfig::default().with_call_timeout(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("call_timeout"))
        );
    }

    #[test]
    fn failure_kinds_set_operations() {
        let kinds = FailureKinds::all().without(FailureKind::Protocol);
        assert!(kinds.contains(FailureKind::Timeout));
        assert!(kinds.contains(FailureKind::Connection));
        assert!(!kinds.contains(FailureKind::Protocol));

        let only_timeouts = FailureKinds::none().with(FailureKind::Timeout);
        assert!(only_timeouts.contains(FailureKind::Timeout));
        assert!(!only_timeouts.contains(FailureKind::Other));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = BreakerBuilder::new(OperationId::from_static("books"))
            .failure_count(0)
            .build();
        assert!(matches!(result, Err(ConfigError::ZeroFailureCount)));
    }
}
