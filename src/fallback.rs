//! Substitute results for rejected or failed calls.

use std::fmt;

use crate::error::{BreakerError, FailureKind, FallbackError};
use crate::registry::OperationId;

/// Produces the degraded result for an operation.
///
/// Implementations must be cheap, free of side effects and must never make
/// the protected remote call themselves. Plain closures returning `T` are
/// fallbacks that cannot fail.
pub trait Fallback<T> {
    /// Computes the substitute value.
    fn compute(self, operation: &OperationId) -> Result<T, FallbackError>;
}

impl<T, F> Fallback<T> for F
where
    F: FnOnce() -> T,
{
    fn compute(self, _operation: &OperationId) -> Result<T, FallbackError> {
        Ok(self())
    }
}

/// A fixed value handed out on every degraded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFallback<T> {
    value: T,
}

impl<T: Clone> StaticFallback<T> {
    /// Wraps the value.
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// The value served on degradation.
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: Clone> Fallback<T> for &StaticFallback<T> {
    fn compute(self, _operation: &OperationId) -> Result<T, FallbackError> {
        Ok(self.value.clone())
    }
}

/// Adapts a fallible closure.
///
/// A failing fallback is a misconfiguration; its error propagates out of
/// [`Engine::execute`](crate::Engine::execute).
pub struct TryFallback<F>(pub F);

impl<T, F> Fallback<T> for TryFallback<F>
where
    F: FnOnce() -> Result<T, FallbackError>,
{
    fn compute(self, operation: &OperationId) -> Result<T, FallbackError> {
        (self.0)().map_err(|e| {
            tracing::error!(%operation, error = %e, "fallback failed");
            e
        })
    }
}

/// Why a result was degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// The breaker did not let the call through.
    Rejected,
    /// The call did not finish in time.
    TimedOut,
    /// The call returned an error.
    Failed(FailureKind),
}

impl<E: 'static> From<&BreakerError<E>> for Degradation {
    fn from(error: &BreakerError<E>) -> Self {
        match error {
            BreakerError::Rejected => Degradation::Rejected,
            BreakerError::Timeout(_) => Degradation::TimedOut,
            BreakerError::Operation(e) => Degradation::Failed(FailureKind::of(e)),
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::Rejected => write!(f, "rejected by circuit breaker"),
            Degradation::TimedOut => write!(f, "timed out"),
            Degradation::Failed(kind) => write!(f, "failed ({:?})", kind),
        }
    }
}

/// A value tagged with whether it came from the protected call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served<T> {
    /// Result of the protected call.
    Live(T),
    /// Fallback result.
    Degraded {
        /// The substitute value.
        value: T,
        /// What caused the degradation.
        reason: Degradation,
    },
}

impl<T> Served<T> {
    /// Whether the value is a fallback.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Served::Degraded { .. })
    }

    /// Why the value was degraded, if it was.
    pub fn reason(&self) -> Option<Degradation> {
        match self {
            Served::Live(_) => None,
            Served::Degraded { reason, .. } => Some(*reason),
        }
    }

    /// Borrows the value.
    pub fn value(&self) -> &T {
        match self {
            Served::Live(value) | Served::Degraded { value, .. } => value,
        }
    }

    /// Drops the tag.
    pub fn into_inner(self) -> T {
        match self {
            Served::Live(value) | Served::Degraded { value, .. } => value,
        }
    }
}
