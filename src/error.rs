//! Error types for the circuit breaker library.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Result type for raw circuit breaker calls.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Why a call guarded by a breaker did not produce a value.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit denied the call without attempting it.
    Rejected,

    /// The call did not finish within the configured bound.
    Timeout(Duration),

    /// The underlying operation failed.
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Whether the call was never attempted.
    pub fn is_rejected(&self) -> bool {
        matches!(self, BreakerError::Rejected)
    }
}

impl<E> Display for BreakerError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Rejected => write!(f, "Circuit breaker rejected the call"),
            BreakerError::Timeout(after) => write!(f, "Call timed out after {:?}", after),
            BreakerError::Operation(e) => write!(f, "Operation error: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Classification of a failed protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The call exceeded its time bound.
    Timeout,
    /// The remote could not be reached.
    Connection,
    /// The remote answered with an error status.
    Protocol,
    /// Any other error returned by the protected call.
    Other,
}

impl FailureKind {
    pub(crate) const fn bit(self) -> u8 {
        match self {
            FailureKind::Timeout => 0b0001,
            FailureKind::Connection => 0b0010,
            FailureKind::Protocol => 0b0100,
            FailureKind::Other => 0b1000,
        }
    }

    /// Classifies an arbitrary call error.
    ///
    /// Errors that are a [`CallError`] carry their own kind; everything else
    /// is [`FailureKind::Other`].
    pub fn of<E: 'static>(error: &E) -> Self {
        match (error as &dyn std::any::Any).downcast_ref::<CallError>() {
            Some(call_error) => call_error.kind(),
            None => FailureKind::Other,
        }
    }
}

/// Failure of one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No response within the bound.
    Timeout(Duration),

    /// The remote was unreachable.
    Connection(String),

    /// The remote answered with an error status.
    Protocol {
        /// Status code returned by the remote.
        status: u16,
    },

    /// The response could not be read.
    Body(String),
}

impl CallError {
    /// The breaker-facing kind of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            CallError::Timeout(_) => FailureKind::Timeout,
            CallError::Connection(_) => FailureKind::Connection,
            CallError::Protocol { .. } | CallError::Body(_) => FailureKind::Protocol,
        }
    }
}

impl Display for CallError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Timeout(after) => write!(f, "remote call timed out after {:?}", after),
            CallError::Connection(reason) => write!(f, "remote unreachable: {}", reason),
            CallError::Protocol { status } => write!(f, "remote answered with status {}", status),
            CallError::Body(reason) => write!(f, "unreadable response body: {}", reason),
        }
    }
}

impl Error for CallError {}

/// Invalid breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Failure rate threshold outside `(0, 1]`.
    FailureRateThreshold(f64),

    /// Count window of size zero.
    EmptyWindow,

    /// Time window split into zero buckets.
    ZeroBuckets,

    /// A duration option that must be positive was zero.
    ZeroDuration(&'static str),

    /// Failure-count trip policy with a count of zero.
    ZeroFailureCount,

    /// The remote call adapter could not be constructed.
    Adapter(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FailureRateThreshold(value) => {
                write!(f, "failure rate threshold {} is outside (0, 1]", value)
            }
            ConfigError::EmptyWindow => write!(f, "count window must hold at least one call"),
            ConfigError::ZeroBuckets => write!(f, "time window needs at least one bucket"),
            ConfigError::ZeroDuration(option) => write!(f, "{} must be greater than zero", option),
            ConfigError::ZeroFailureCount => write!(f, "failure count threshold must be at least 1"),
            ConfigError::Adapter(reason) => write!(f, "cannot build remote call adapter: {}", reason),
        }
    }
}

impl Error for ConfigError {}

/// A fallback that failed to produce a value.
///
/// Fallbacks are infallible by contract; this error signals a
/// misconfigured call site rather than an outage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackError {
    /// What went wrong.
    pub reason: String,
}

impl FallbackError {
    /// Creates a fallback error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Display for FallbackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "fallback failed: {}", self.reason)
    }
}

impl Error for FallbackError {}

/// The errors allowed to escape [`Engine::execute`](crate::Engine::execute).
///
/// Rejections, failures and timeouts of the protected call never appear
/// here; they are turned into fallback results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    /// The fallback itself failed.
    Fallback(FallbackError),

    /// The operation identity is not usable.
    InvalidOperation(String),
}

impl Display for ExecuteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::Fallback(e) => write!(f, "{}", e),
            ExecuteError::InvalidOperation(id) => write!(f, "invalid operation identity {:?}", id),
        }
    }
}

impl Error for ExecuteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecuteError::Fallback(e) => Some(e),
            ExecuteError::InvalidOperation(_) => None,
        }
    }
}

impl From<FallbackError> for ExecuteError {
    fn from(e: FallbackError) -> Self {
        ExecuteError::Fallback(e)
    }
}
