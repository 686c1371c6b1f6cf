//! Core circuit breaker implementation.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::{BreakerBuilder, BreakerConfig};
use crate::error::{BreakerError, BreakerResult, FailureKind};
use crate::metrics::{CallEvent, MetricSink, OutcomeKind, TransitionEvent};
use crate::policy::BreakerPolicy;
use crate::registry::OperationId;
use crate::state::{State, Transition};
use crate::window::{RollingWindow, WindowStats};

type Transitions = SmallVec<[Transition; 2]>;

/// Mutable breaker state. Only ever touched with the state lock held.
struct Core {
    state: State,
    window: RollingWindow,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// When the outstanding trial was admitted.
    trial_started: Option<Instant>,
    /// Bumped on every transition so outcomes of calls admitted under an
    /// earlier state can be told apart from current ones.
    generation: u64,
}

impl Core {
    fn enter(&mut self, to: State, now: Instant, transitions: &mut Transitions) {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.trial_in_flight = to == State::HalfOpen;
        self.trial_started = self.trial_in_flight.then_some(now);

        match to {
            State::Open => self.opened_at = Some(now),
            State::Closed => {
                self.opened_at = None;
                self.window.reset();
            }
            State::HalfOpen => {}
        }

        transitions.push(Transition::new(from, to, self.generation));
    }

    /// Gives up on a trial that has outlived `call_timeout`.
    ///
    /// The trial counts as failed at its deadline; its late outcome is stale.
    fn expire_trial(&mut self, now: Instant, call_timeout: Duration, transitions: &mut Transitions) {
        if self.state != State::HalfOpen || !self.trial_in_flight {
            return;
        }
        if let Some(deadline) = self.trial_started.map(|at| at + call_timeout) {
            if now >= deadline {
                self.enter(State::Open, deadline, transitions);
            }
        }
    }
}

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner {
    operation: OperationId,
    config: BreakerConfig,
    policy: Box<dyn BreakerPolicy>,
    core: Mutex<Core>,
    metric_sink: Arc<dyn MetricSink>,
    clock: Arc<dyn Clock>,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    /// Call site the breaker guards.
    pub operation: OperationId,
    /// Current state.
    pub state: State,
    /// Counts over the rolling window.
    pub window: WindowStats,
    /// Failure ratio over the rolling window.
    pub error_rate: f64,
    /// When the breaker last opened, if it is not closed.
    pub opened_at: Option<Instant>,
    /// Whether a half-open trial call is outstanding.
    pub trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Success,
    Failure(FailureKind),
}

/// A circuit breaker guarding the calls of one operation.
///
/// Clones share the same state machine.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("operation", &self.inner.operation)
            .field("state", &self.current_state())
            .finish()
    }
}

impl CircuitBreaker {
    pub(crate) fn new(
        operation: OperationId,
        config: BreakerConfig,
        policy: Box<dyn BreakerPolicy>,
        metric_sink: Arc<dyn MetricSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let core = Core {
            state: State::Closed,
            window: RollingWindow::new(config.window),
            opened_at: None,
            trial_in_flight: false,
            trial_started: None,
            generation: 0,
        };

        Self {
            inner: Arc::new(BreakerInner {
                operation,
                config,
                policy,
                core: Mutex::new(core),
                metric_sink,
                clock,
            }),
        }
    }

    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder(operation: OperationId) -> BreakerBuilder {
        BreakerBuilder::new(operation)
    }

    /// The operation this breaker guards.
    pub fn operation(&self) -> &OperationId {
        &self.inner.operation
    }

    /// The configuration the breaker was built with.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Gets the current state of the circuit breaker.
    pub fn current_state(&self) -> State {
        self.inner.core.lock().state
    }

    /// Gets the current error rate over the rolling window.
    pub fn error_rate(&self) -> f64 {
        let now = self.inner.clock.now();
        self.inner.core.lock().window.stats(now).error_rate()
    }

    /// Copies the breaker's state and statistics.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.inner.clock.now();
        let mut core = self.inner.core.lock();
        let window = core.window.stats(now);

        BreakerSnapshot {
            operation: self.inner.operation.clone(),
            state: core.state,
            window,
            error_rate: window.error_rate(),
            opened_at: core.opened_at,
            trial_in_flight: core.trial_in_flight,
        }
    }

    /// Whether two handles share one state machine.
    pub fn ptr_eq(&self, other: &CircuitBreaker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Asks the breaker for permission to make one call.
    ///
    /// Returns `None` when the call is rejected; the rejection has already
    /// been reported. The returned permit must be settled with
    /// [`CallPermit::success`] or [`CallPermit::failure`]; a permit dropped
    /// unsettled counts as a timed out call.
    ///
    /// A half-open trial that stays unsettled past `call_timeout` loses its
    /// claim: the circuit reopens as of the trial's deadline and the late
    /// outcome is ignored.
    pub fn try_acquire(&self) -> Option<CallPermit> {
        let now = self.inner.clock.now();
        let mut transitions = Transitions::new();

        let admitted = {
            let mut core = self.inner.core.lock();
            core.expire_trial(now, self.inner.config.call_timeout, &mut transitions);

            let state = core.state;
            match state {
                State::Closed => Some((Admission::Normal, core.generation)),
                State::Open => {
                    let elapsed = core
                        .opened_at
                        .map_or(Duration::MAX, |at| now.saturating_duration_since(at));
                    if elapsed >= self.inner.config.reset_timeout {
                        // This caller becomes the trial.
                        core.enter(State::HalfOpen, now, &mut transitions);
                        Some((Admission::Trial, core.generation))
                    } else {
                        None
                    }
                }
                State::HalfOpen if core.trial_in_flight => None,
                State::HalfOpen => {
                    core.trial_in_flight = true;
                    core.trial_started = Some(now);
                    Some((Admission::Trial, core.generation))
                }
            }
        };

        self.publish_transitions(&transitions);

        match admitted {
            Some((admission, generation)) => Some(CallPermit {
                breaker: self.clone(),
                pending: Some(admission),
                generation,
                started: now,
            }),
            None => {
                tracing::debug!(operation = %self.inner.operation, "call rejected");
                self.publish_call(OutcomeKind::Rejected, Duration::ZERO);
                None
            }
        }
    }

    /// Executes a function wrapped by the circuit breaker.
    ///
    /// A call that returns after `call_timeout` has elapsed counts as a
    /// timeout and its value is discarded.
    pub fn call<F, T, E>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let permit = self.try_acquire().ok_or(BreakerError::Rejected)?;
        let result = f();

        let elapsed = permit.elapsed();
        if elapsed > self.inner.config.call_timeout {
            permit.failure(FailureKind::Timeout);
            return Err(BreakerError::Timeout(elapsed));
        }

        match result {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure(FailureKind::of(&e));
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Forces the circuit breaker to the open state.
    pub fn force_open(&self) -> bool {
        self.force(State::Open)
    }

    /// Forces the circuit breaker to the closed state, clearing statistics.
    pub fn force_closed(&self) -> bool {
        self.force(State::Closed)
    }

    fn force(&self, to: State) -> bool {
        let now = self.inner.clock.now();
        let mut transitions = Transitions::new();
        {
            let mut core = self.inner.core.lock();
            if core.state == to {
                return false;
            }
            core.enter(to, now, &mut transitions);
        }

        self.publish_transitions(&transitions);
        true
    }

    fn settle(&self, admission: Admission, generation: u64, outcome: Settled, latency: Duration) {
        let now = self.inner.clock.now();
        let (failed, counted) = match outcome {
            Settled::Success => (false, true),
            Settled::Failure(kind) => (true, self.inner.config.counted_failures.contains(kind)),
        };
        let mut transitions = Transitions::new();

        {
            let mut core = self.inner.core.lock();
            // Outcomes from before the latest transition do not move the state machine.
            if core.generation == generation {
                let state = core.state;
                match (admission, state) {
                    (Admission::Trial, State::HalfOpen) => {
                        if !failed {
                            core.enter(State::Closed, now, &mut transitions);
                        } else if counted {
                            core.enter(State::Open, now, &mut transitions);
                        } else {
                            // Inconclusive trial; the next caller becomes the trial.
                            core.trial_in_flight = false;
                            core.trial_started = None;
                        }
                    }
                    (Admission::Normal, State::Closed) if counted => {
                        core.window.record(failed, now);
                        if failed {
                            let stats = core.window.stats(now);
                            if self.inner.policy.should_trip(&stats) {
                                core.enter(State::Open, now, &mut transitions);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let kind = match outcome {
            Settled::Success => OutcomeKind::Success,
            Settled::Failure(FailureKind::Timeout) => OutcomeKind::Timeout,
            Settled::Failure(_) => OutcomeKind::Failure,
        };
        self.publish_call(kind, latency);
        self.publish_transitions(&transitions);
    }

    fn publish_call(&self, outcome: OutcomeKind, latency: Duration) {
        self.inner.metric_sink.record_call(&CallEvent {
            operation: self.inner.operation.clone(),
            outcome,
            latency,
            at: self.inner.clock.wall(),
        });
    }

    fn publish_transitions(&self, transitions: &Transitions) {
        for transition in transitions {
            let operation = &self.inner.operation;
            if transition.to == State::Open {
                tracing::warn!(%operation, from = %transition.from, to = %transition.to, "circuit breaker opened");
            } else {
                tracing::info!(%operation, from = %transition.from, to = %transition.to, "circuit breaker transition");
            }

            self.inner.metric_sink.record_transition(&TransitionEvent {
                operation: operation.clone(),
                from: transition.from,
                to: transition.to,
                sequence: transition.sequence,
                at: self.inner.clock.wall(),
            });
        }
    }
}

/// Permission to make one protected call.
///
/// Returned by [`CircuitBreaker::try_acquire`]. Exactly one outcome is
/// reported per permit: explicitly, or as a timeout when the permit is
/// dropped unsettled (a cancelled caller or a panicking call).
#[must_use = "an unsettled permit is recorded as a timed out call"]
pub struct CallPermit {
    breaker: CircuitBreaker,
    pending: Option<Admission>,
    generation: u64,
    started: Instant,
}

impl CallPermit {
    /// Whether this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.pending == Some(Admission::Trial)
    }

    /// Time since the permit was granted.
    pub fn elapsed(&self) -> Duration {
        self.breaker
            .inner
            .clock
            .now()
            .saturating_duration_since(self.started)
    }

    /// Reports that the call succeeded.
    pub fn success(mut self) {
        self.settle(Settled::Success);
    }

    /// Reports that the call failed.
    pub fn failure(mut self, kind: FailureKind) {
        self.settle(Settled::Failure(kind));
    }

    fn settle(&mut self, outcome: Settled) {
        if let Some(admission) = self.pending.take() {
            let latency = self.elapsed();
            self.breaker
                .settle(admission, self.generation, outcome, latency);
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.pending.is_some() {
            tracing::debug!(
                operation = %self.breaker.inner.operation,
                "call abandoned before completion"
            );
            self.settle(Settled::Failure(FailureKind::Timeout));
        }
    }
}

#[cfg(feature = "async")]
impl CircuitBreaker {
    /// Executes an async function wrapped by the circuit breaker.
    ///
    /// The future is cancelled once `call_timeout` elapses. Dropping the
    /// returned future while the call is in flight records a timeout.
    pub async fn call_async<F, Fut, T, E>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: 'static,
    {
        let permit = self.try_acquire().ok_or(BreakerError::Rejected)?;
        let bound = self.inner.config.call_timeout;

        match tokio::time::timeout(bound, f()).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.failure(FailureKind::of(&e));
                Err(BreakerError::Operation(e))
            }
            Err(_) => {
                permit.failure(FailureKind::Timeout);
                Err(BreakerError::Timeout(bound))
            }
        }
    }
}
