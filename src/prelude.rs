//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use reading_breaker::prelude::*;
//! ```

pub use crate::{
    BreakerConfig, BreakerError, BreakerRegistry, CircuitBreaker, Engine, ExecuteError, Fallback,
    MetricSink, OperationId, Served, State, StaticFallback, WindowPolicy,
};

#[cfg(feature = "async")]
pub use crate::adapter::RemoteCall;
