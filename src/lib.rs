//! # reading-breaker
//!
//! Circuit-breaker protected service-to-service calls. A consumer keeps
//! answering, with degraded content, while the provider it depends on is
//! slow or down.
//!
//! Every protected call site is identified by an [`OperationId`]. A
//! [`BreakerRegistry`] owns exactly one [`CircuitBreaker`] per identity, and
//! the [`Engine`] runs calls through it, serving a [`Fallback`] whenever the
//! call is rejected, fails or times out.
//!
//! ## What is a Circuit Breaker?
//!
//! - **Closed**: Normal operation. Calls pass through to the protected resource.
//! - **Open**: Calls are immediately rejected without attempting to reach the resource.
//! - **Half-Open**: After the reset timeout, a single trial call is let through
//!   to check whether the resource has recovered.
//!
//! ## Basic Usage
//!
//! ```rust
//! use reading_breaker::{BreakerConfig, BreakerRegistry, Engine, OperationId};
//! use std::sync::Arc;
//!
//! let registry = BreakerRegistry::builder()
//!     .defaults(BreakerConfig::default().with_minimum_request_volume(5))
//!     .build()
//!     .expect("valid configuration");
//! let engine = Engine::new(Arc::new(registry));
//! let books = OperationId::new("bookstore.recommended").expect("valid identity");
//!
//! let list = engine
//!     .execute(
//!         &books,
//!         || Err::<String, _>("bookstore unreachable"),
//!         || "Cloud Native Java (O'Reilly)".to_string(),
//!     )
//!     .expect("fallback cannot fail");
//! assert_eq!(list, "Cloud Native Java (O'Reilly)");
//! ```
//!
//! ## Async Support
//!
//! With the `async` feature (on by default) calls can be futures; they are
//! cancelled once the operation's `call_timeout` elapses:
//!
//! ```rust,ignore
//! let list = engine
//!     .execute_async(&books, || adapter.invoke(), || fallback.clone())
//!     .await?;
//! ```
//!
//! ## Features
//!
//! - `async` - Async calls and timeouts with Tokio (default)
//! - `http` - HTTP remote call adapter over reqwest (default)
//! - `prometheus` - Prometheus metrics sink

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "async")]
pub mod adapter;
mod breaker;
mod clock;
mod config;
mod engine;
mod error;
mod fallback;
mod metrics;
mod policy;
pub mod prelude;
#[cfg(feature = "async")]
pub mod reading;
mod registry;
mod state;
mod window;

// Re-exports
pub use breaker::{BreakerSnapshot, CallPermit, CircuitBreaker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BreakerBuilder, BreakerConfig, FailureKinds, TripPolicy};
pub use engine::Engine;
pub use error::{
    BreakerError, BreakerResult, CallError, ConfigError, ExecuteError, FailureKind, FallbackError,
};
pub use fallback::{Degradation, Fallback, Served, StaticFallback, TryFallback};
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusSink;
pub use metrics::{
    CallEvent, EventLog, FanoutSink, MetricSink, MetricsSnapshot, NullMetricSink,
    OperationSnapshot, OutcomeKind, TransitionEvent,
};
pub use policy::{BreakerPolicy, FailureCountPolicy, FailureRatePolicy};
pub use registry::{BreakerRegistry, OperationId, RegistryBuilder};
pub use state::{State, Transition};
pub use window::{WindowPolicy, WindowStats};
