//! Circuit breaker states and transitions.

use std::fmt;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Circuit is closed and calls reach the protected operation.
    Closed = 0,

    /// Circuit is open and calls are rejected without being attempted.
    Open = 1,

    /// Circuit is letting a single trial call through to test recovery.
    HalfOpen = 2,
}

impl State {
    /// Stable lowercase label, used for metric labels and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change that happened inside a breaker's critical section.
///
/// Transitions are collected while the state lock is held and published to
/// the metric sink only after it has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: State,
    /// State after the change.
    pub to: State,
    /// Position of the change in the breaker's history, starting at 1.
    pub sequence: u64,
}

impl Transition {
    pub(crate) fn new(from: State, to: State, sequence: u64) -> Self {
        Self { from, to, sequence }
    }
}
