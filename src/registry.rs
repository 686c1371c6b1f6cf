//! One circuit breaker per protected operation.

use ahash::RandomState;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::{ConfigError, ExecuteError};
use crate::metrics::{MetricSink, NullMetricSink};

/// Identity of one protected call site.
///
/// Cheap to clone. Must be non-empty and free of whitespace and control
/// characters.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(Arc<str>);

impl OperationId {
    /// Validates and wraps an identity.
    pub fn new(id: impl Into<String>) -> Result<Self, ExecuteError> {
        let id = id.into();
        if Self::is_valid(&id) {
            Ok(Self(Arc::from(id)))
        } else {
            Err(ExecuteError::InvalidOperation(id))
        }
    }

    /// Wraps a compile-time identity.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a valid identity.
    pub fn from_static(id: &'static str) -> Self {
        assert!(Self::is_valid(id), "invalid operation identity {:?}", id);
        Self(Arc::from(id))
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(id: &str) -> bool {
        !id.is_empty() && !id.chars().any(|c| c.is_whitespace() || c.is_control())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({:?})", &*self.0)
    }
}

impl AsRef<str> for OperationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

static GLOBAL: Lazy<Arc<BreakerRegistry>> = Lazy::new(|| Arc::new(BreakerRegistry::new()));

/// Owns the breaker of every operation.
///
/// Breakers are created on first use and live as long as the registry.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<OperationId, CircuitBreaker, RandomState>>,
    defaults: BreakerConfig,
    overrides: HashMap<OperationId, BreakerConfig, RandomState>,
    metric_sink: Arc<dyn MetricSink>,
    clock: Arc<dyn Clock>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    /// Creates a registry using the default configuration for every operation.
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::default()),
            defaults: BreakerConfig::default(),
            overrides: HashMap::default(),
            metric_sink: Arc::new(NullMetricSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates a builder for a customized registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The process-wide registry, with default settings.
    pub fn global() -> Arc<BreakerRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Returns the breaker for `operation`, creating it on first use.
    ///
    /// Concurrent first uses of one identity all receive the same breaker.
    pub fn get_or_create(&self, operation: &OperationId) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().get(operation) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(operation.clone())
            .or_insert_with(|| self.create(operation))
            .clone()
    }

    /// Returns the breaker for `operation` if it has been created.
    pub fn get(&self, operation: &OperationId) -> Option<CircuitBreaker> {
        self.breakers.read().get(operation).cloned()
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Snapshots every breaker, sorted by operation.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<CircuitBreaker> = self.breakers.read().values().cloned().collect();
        let mut snapshots: Vec<_> = breakers.iter().map(CircuitBreaker::snapshot).collect();
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }

    fn create(&self, operation: &OperationId) -> CircuitBreaker {
        let config = self
            .overrides
            .get(operation)
            .unwrap_or(&self.defaults)
            .clone();
        tracing::debug!(%operation, "creating circuit breaker");

        let policy = config.policy();
        CircuitBreaker::new(
            operation.clone(),
            config,
            policy,
            Arc::clone(&self.metric_sink),
            Arc::clone(&self.clock),
        )
    }
}

/// Builder for [`BreakerRegistry`].
pub struct RegistryBuilder {
    defaults: BreakerConfig,
    overrides: HashMap<OperationId, BreakerConfig, RandomState>,
    metric_sink: Arc<dyn MetricSink>,
    clock: Arc<dyn Clock>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            defaults: BreakerConfig::default(),
            overrides: HashMap::default(),
            metric_sink: Arc::new(NullMetricSink),
            clock: Arc::new(SystemClock),
        }
    }
}

impl RegistryBuilder {
    /// Configuration for operations without an override.
    pub fn defaults(mut self, config: BreakerConfig) -> Self {
        self.defaults = config;
        self
    }

    /// Configuration for one operation.
    pub fn operation(mut self, operation: OperationId, config: BreakerConfig) -> Self {
        self.overrides.insert(operation, config);
        self
    }

    /// Sink receiving events from every breaker.
    pub fn metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Time source shared by every breaker.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates every configuration and builds the registry.
    pub fn build(self) -> Result<BreakerRegistry, ConfigError> {
        self.defaults.validate()?;
        for config in self.overrides.values() {
            config.validate()?;
        }

        Ok(BreakerRegistry {
            breakers: RwLock::new(HashMap::default()),
            defaults: self.defaults,
            overrides: self.overrides,
            metric_sink: self.metric_sink,
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn operation_ids_are_validated() {
        assert!(OperationId::new("bookstore.recommended").is_ok());
        assert_eq!(
            OperationId::new(""),
            Err(ExecuteError::InvalidOperation(String::new()))
        );
        assert!(OperationId::new("has space").is_err());
        assert!(OperationId::new("tab\there").is_err());
    }

    #[test]
    #[should_panic(expected = "invalid operation identity")]
    fn from_static_panics_on_invalid_identity() {
        let _ = OperationId::from_static(" ");
    }

    #[test]
    fn same_identity_same_breaker() {
        let registry = BreakerRegistry::new();
        let books = OperationId::from_static("books");

        let first = registry.get_or_create(&books);
        let second = registry.get_or_create(&OperationId::new("books").expect("valid"));
        assert!(first.ptr_eq(&second));

        let other = registry.get_or_create(&OperationId::from_static("authors"));
        assert!(!first.ptr_eq(&other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn concurrent_first_use_converges() {
        const CALLERS: usize = 16;
        let registry = Arc::new(BreakerRegistry::new());
        let barrier = Arc::new(Barrier::new(CALLERS));
        let books = OperationId::from_static("books");

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                let books = books.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create(&books)
                })
            })
            .collect();

        let breakers: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("caller thread"))
            .collect();

        assert_eq!(registry.len(), 1);
        assert!(breakers.iter().all(|b| b.ptr_eq(&breakers[0])));
    }

    #[test]
    fn overrides_apply_per_operation() {
        let slow = BreakerConfig::default().with_reset_timeout(Duration::from_secs(60));
        let registry = BreakerRegistry::builder()
            .operation(OperationId::from_static("slow"), slow)
            .build()
            .expect("valid configs");

        let slow = registry.get_or_create(&OperationId::from_static("slow"));
        let fast = registry.get_or_create(&OperationId::from_static("fast"));
        assert_eq!(slow.config().reset_timeout, Duration::from_secs(60));
        assert_eq!(fast.config().reset_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_validates_overrides() {
        let broken = BreakerConfig::default().with_failure_rate_threshold(2.0);
        let result = BreakerRegistry::builder()
            .operation(OperationId::from_static("broken"), broken)
            .build();
        assert!(matches!(result, Err(ConfigError::FailureRateThreshold(_))));
    }

    #[test]
    fn snapshot_lists_every_breaker() {
        let registry = BreakerRegistry::new();
        assert!(registry.is_empty());
        registry.get_or_create(&OperationId::from_static("b"));
        registry.get_or_create(&OperationId::from_static("a"));
        registry
            .get(&OperationId::from_static("b"))
            .expect("created")
            .force_open();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].operation.as_str(), "a");
        assert_eq!(snapshot[0].state, State::Closed);
        assert_eq!(snapshot[1].state, State::Open);
    }

    #[test]
    fn global_registry_is_shared() {
        let id = OperationId::from_static("registry.tests.global");
        let first = BreakerRegistry::global().get_or_create(&id);
        let second = BreakerRegistry::global().get_or_create(&id);
        assert!(first.ptr_eq(&second));
    }
}
