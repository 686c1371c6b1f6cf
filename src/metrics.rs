//! Call outcome and state transition events, and sinks that consume them.

use ahash::RandomState;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::registry::OperationId;
use crate::state::State;

/// How one invocation attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// The protected call returned a value.
    Success,
    /// The protected call returned an error.
    Failure,
    /// The protected call exceeded its time bound, or was abandoned.
    Timeout,
    /// The breaker denied the call without attempting it.
    Rejected,
}

impl OutcomeKind {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Failure => "failure",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::Rejected => "rejected",
        }
    }
}

/// One invocation attempt, as reported to sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    /// Call site the attempt belongs to.
    pub operation: OperationId,
    /// How it ended.
    pub outcome: OutcomeKind,
    /// Time spent in the protected call; zero for rejections.
    pub latency: Duration,
    /// When the outcome was recorded.
    pub at: SystemTime,
}

/// One breaker state change, as reported to sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    /// Call site whose breaker changed state.
    pub operation: OperationId,
    /// Previous state.
    pub from: State,
    /// New state.
    pub to: State,
    /// Per-breaker ordering of transitions. Sinks may receive transitions
    /// of one breaker out of order; a higher sequence is more recent.
    pub sequence: u64,
    /// When the change happened.
    pub at: SystemTime,
}

/// Trait for metrics sinks that can receive circuit breaker events.
///
/// Sinks are called after the breaker's state lock has been released. They
/// observe; nothing they do feeds back into breaker decisions.
pub trait MetricSink: Send + Sync + 'static {
    /// Records the outcome of one invocation attempt.
    fn record_call(&self, event: &CallEvent);

    /// Records a state transition event.
    fn record_transition(&self, event: &TransitionEvent);
}

/// A null metrics sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_call(&self, _event: &CallEvent) {}
    fn record_transition(&self, _event: &TransitionEvent) {}
}

/// Delivers every event to several sinks, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: SmallVec<[Arc<dyn MetricSink>; 4]>,
}

impl FanoutSink {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    pub fn with(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricSink for FanoutSink {
    fn record_call(&self, event: &CallEvent) {
        for sink in &self.sinks {
            sink.record_call(event);
        }
    }

    fn record_transition(&self, event: &TransitionEvent) {
        for sink in &self.sinks {
            sink.record_transition(event);
        }
    }
}

/// Per-operation view exposed by [`EventLog::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSnapshot {
    /// Call site.
    pub operation: OperationId,
    /// State entered by the most recent transition.
    pub state: State,
    /// Sequence of that transition; zero before the first one.
    pub sequence: u64,
    /// Successful calls.
    pub successes: u64,
    /// Failed calls, timeouts excluded.
    pub failures: u64,
    /// Timed out or abandoned calls.
    pub timeouts: u64,
    /// Rejected calls.
    pub rejected: u64,
}

/// Point-in-time copy of everything an [`EventLog`] has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// One entry per operation, sorted by identity.
    pub operations: Vec<OperationSnapshot>,
    /// Most recent transitions, oldest first.
    pub transitions: Vec<TransitionEvent>,
}

#[derive(Debug)]
struct LogInner {
    operations: HashMap<OperationId, OperationSnapshot, RandomState>,
    transitions: VecDeque<TransitionEvent>,
}

impl LogInner {
    fn entry(&mut self, operation: &OperationId) -> &mut OperationSnapshot {
        self.operations
            .entry(operation.clone())
            .or_insert_with(|| OperationSnapshot {
                operation: operation.clone(),
                state: State::Closed,
                sequence: 0,
                successes: 0,
                failures: 0,
                timeouts: 0,
                rejected: 0,
            })
    }
}

/// In-memory sink backing a polling observability endpoint.
///
/// Keeps counters per operation and the last `capacity` transitions.
/// Transitions of one operation are kept in sequence order, whatever order
/// they arrive in.
#[derive(Debug)]
pub struct EventLog {
    inner: Mutex<LogInner>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventLog {
    /// Creates a log retaining at most `capacity` transitions.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                operations: HashMap::default(),
                transitions: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Counters for one operation, if it has been seen.
    pub fn operation(&self, operation: &OperationId) -> Option<OperationSnapshot> {
        self.inner.lock().operations.get(operation).cloned()
    }

    /// Copies the current counters and transition log.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let mut operations: Vec<_> = inner.operations.values().cloned().collect();
        operations.sort_by(|a, b| a.operation.cmp(&b.operation));

        MetricsSnapshot {
            operations,
            transitions: inner.transitions.iter().cloned().collect(),
        }
    }
}

impl MetricSink for EventLog {
    fn record_call(&self, event: &CallEvent) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(&event.operation);
        match event.outcome {
            OutcomeKind::Success => entry.successes += 1,
            OutcomeKind::Failure => entry.failures += 1,
            OutcomeKind::Timeout => entry.timeouts += 1,
            OutcomeKind::Rejected => entry.rejected += 1,
        }
    }

    fn record_transition(&self, event: &TransitionEvent) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(&event.operation);
        if event.sequence > entry.sequence {
            entry.state = event.to;
            entry.sequence = event.sequence;
        }

        if inner.transitions.len() == self.capacity {
            inner.transitions.pop_front();
        }
        // Late arrivals go before the newer transitions of their operation.
        let at = inner
            .transitions
            .iter()
            .position(|t| t.operation == event.operation && t.sequence > event.sequence)
            .unwrap_or(inner.transitions.len());
        inner.transitions.insert(at, event.clone());
    }
}

#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusSink;

#[cfg(feature = "prometheus")]
mod prometheus {
    use prometheus_client::encoding::EncodeLabelSet;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::gauge::Gauge;
    use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
    use prometheus_client::registry::Registry;

    use ahash::RandomState;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::{CallEvent, MetricSink, OutcomeKind, TransitionEvent};
    use crate::registry::OperationId;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct OperationLabels {
        operation: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct CallLabels {
        operation: String,
        outcome: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct TransitionLabels {
        operation: String,
        from: String,
        to: String,
    }

    fn latency_histogram() -> Histogram {
        Histogram::new(exponential_buckets(0.001, 2.0, 14))
    }

    /// Exports breaker events as Prometheus metrics.
    ///
    /// The state gauge encodes closed as 0, open as 1 and half-open as 2.
    #[derive(Clone)]
    pub struct PrometheusSink {
        calls: Family<CallLabels, Counter>,
        transitions: Family<TransitionLabels, Counter>,
        state: Family<OperationLabels, Gauge>,
        latency: Family<OperationLabels, Histogram, fn() -> Histogram>,
        /// Sequence of the transition each state gauge currently shows.
        shown: Arc<Mutex<HashMap<OperationId, u64, RandomState>>>,
    }

    impl PrometheusSink {
        /// Creates the metric families and registers them.
        pub fn register(registry: &mut Registry) -> Self {
            let sink = Self {
                calls: Family::default(),
                transitions: Family::default(),
                state: Family::default(),
                latency: Family::new_with_constructor(latency_histogram as fn() -> Histogram),
                shown: Arc::default(),
            };

            registry.register(
                "breaker_calls",
                "Invocation attempts by outcome",
                sink.calls.clone(),
            );
            registry.register(
                "breaker_transitions",
                "Circuit breaker state transitions",
                sink.transitions.clone(),
            );
            registry.register(
                "breaker_state",
                "Current circuit breaker state",
                sink.state.clone(),
            );
            registry.register(
                "breaker_call_duration_seconds",
                "Latency of attempted protected calls",
                sink.latency.clone(),
            );

            sink
        }
    }

    impl MetricSink for PrometheusSink {
        fn record_call(&self, event: &CallEvent) {
            let operation = event.operation.to_string();
            self.calls
                .get_or_create(&CallLabels {
                    operation: operation.clone(),
                    outcome: event.outcome.as_str().to_string(),
                })
                .inc();

            if event.outcome != OutcomeKind::Rejected {
                self.latency
                    .get_or_create(&OperationLabels { operation })
                    .observe(event.latency.as_secs_f64());
            }
        }

        fn record_transition(&self, event: &TransitionEvent) {
            let operation = event.operation.to_string();
            self.transitions
                .get_or_create(&TransitionLabels {
                    operation: operation.clone(),
                    from: event.from.as_str().to_string(),
                    to: event.to.as_str().to_string(),
                })
                .inc();

            let mut shown = self.shown.lock();
            let latest = shown.entry(event.operation.clone()).or_insert(0);
            if event.sequence > *latest {
                *latest = event.sequence;
                self.state
                    .get_or_create(&OperationLabels { operation })
                    .set(event.to as i64);
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(operation: &OperationId, outcome: OutcomeKind) -> CallEvent {
        CallEvent {
            operation: operation.clone(),
            outcome,
            latency: Duration::from_millis(1),
            at: SystemTime::now(),
        }
    }

    fn transition(operation: &OperationId, from: State, to: State, sequence: u64) -> TransitionEvent {
        TransitionEvent {
            operation: operation.clone(),
            from,
            to,
            sequence,
            at: SystemTime::now(),
        }
    }

    #[test]
    fn event_log_counts_outcomes_per_operation() {
        let log = EventLog::default();
        let books = OperationId::from_static("books");
        let authors = OperationId::from_static("authors");

        log.record_call(&call(&books, OutcomeKind::Success));
        log.record_call(&call(&books, OutcomeKind::Failure));
        log.record_call(&call(&books, OutcomeKind::Timeout));
        log.record_call(&call(&books, OutcomeKind::Rejected));
        log.record_call(&call(&books, OutcomeKind::Rejected));
        log.record_call(&call(&authors, OutcomeKind::Success));

        let snapshot = log.snapshot();
        assert_eq!(snapshot.operations.len(), 2);
        assert_eq!(snapshot.operations[0].operation, authors);

        let books_counts = log.operation(&books).expect("books was recorded");
        assert_eq!(books_counts.successes, 1);
        assert_eq!(books_counts.failures, 1);
        assert_eq!(books_counts.timeouts, 1);
        assert_eq!(books_counts.rejected, 2);
        assert_eq!(books_counts.state, State::Closed);
    }

    #[test]
    fn event_log_keeps_bounded_transition_history() {
        let log = EventLog::new(2);
        let books = OperationId::from_static("books");

        log.record_transition(&transition(&books, State::Closed, State::Open, 1));
        log.record_transition(&transition(&books, State::Open, State::HalfOpen, 2));
        log.record_transition(&transition(&books, State::HalfOpen, State::Closed, 3));

        let snapshot = log.snapshot();
        assert_eq!(snapshot.transitions.len(), 2);
        assert_eq!(snapshot.transitions[0].to, State::HalfOpen);
        assert_eq!(snapshot.operations[0].state, State::Closed);
    }

    #[test]
    fn late_transition_does_not_override_state() {
        let log = EventLog::default();
        let books = OperationId::from_static("books");
        let authors = OperationId::from_static("authors");

        log.record_transition(&transition(&books, State::Open, State::HalfOpen, 2));
        log.record_transition(&transition(&authors, State::Closed, State::Open, 1));
        log.record_transition(&transition(&books, State::HalfOpen, State::Closed, 3));
        // Published by a thread that was descheduled after tripping.
        log.record_transition(&transition(&books, State::Closed, State::Open, 1));

        let counts = log.operation(&books).expect("books was recorded");
        assert_eq!(counts.state, State::Closed);
        assert_eq!(counts.sequence, 3);

        let order: Vec<_> = log
            .snapshot()
            .transitions
            .iter()
            .map(|t| (t.operation.as_str().to_string(), t.sequence))
            .collect();
        assert_eq!(
            order,
            vec![
                ("books".to_string(), 1),
                ("books".to_string(), 2),
                ("authors".to_string(), 1),
                ("books".to_string(), 3),
            ]
        );
    }

    #[test]
    fn fanout_delivers_to_every_sink() {
        let first = Arc::new(EventLog::default());
        let second = Arc::new(EventLog::default());
        let fanout = FanoutSink::new()
            .with(first.clone() as Arc<dyn MetricSink>)
            .with(second.clone() as Arc<dyn MetricSink>);
        let books = OperationId::from_static("books");

        fanout.record_call(&call(&books, OutcomeKind::Success));

        assert_eq!(first.operation(&books).map(|s| s.successes), Some(1));
        assert_eq!(second.operation(&books).map(|s| s.successes), Some(1));
    }
}
