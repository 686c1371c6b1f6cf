//! Entry point wrapping protected calls with breaker and fallback.

use std::fmt::Display;
use std::sync::Arc;

use crate::error::{BreakerError, ExecuteError};
use crate::fallback::{Degradation, Fallback, Served};
use crate::registry::{BreakerRegistry, OperationId};

/// Runs protected calls through the breaker of their operation.
///
/// Callers get either the real result or the fallback result. Rejections,
/// failures and timeouts are never returned as errors.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<BreakerRegistry>,
}

impl Engine {
    /// Creates an engine over an explicit registry.
    pub fn new(registry: Arc<BreakerRegistry>) -> Self {
        Self { registry }
    }

    /// The registry holding this engine's breakers.
    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    /// Runs `call` under the breaker for `operation`, degrading to `fallback`.
    pub fn execute<T, E, F, G>(
        &self,
        operation: &OperationId,
        call: F,
        fallback: G,
    ) -> Result<T, ExecuteError>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display + 'static,
        G: Fallback<T>,
    {
        self.execute_detailed(operation, call, fallback)
            .map(Served::into_inner)
    }

    /// Like [`Engine::execute`], but tags the result as live or degraded.
    pub fn execute_detailed<T, E, F, G>(
        &self,
        operation: &OperationId,
        call: F,
        fallback: G,
    ) -> Result<Served<T>, ExecuteError>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display + 'static,
        G: Fallback<T>,
    {
        let breaker = self.registry.get_or_create(operation);
        match breaker.call(call) {
            Ok(value) => Ok(Served::Live(value)),
            Err(error) => degrade(operation, error, fallback),
        }
    }
}

#[cfg(feature = "async")]
impl Engine {
    /// Async form of [`Engine::execute`]; the call is bounded by the
    /// operation's `call_timeout`.
    pub async fn execute_async<T, E, F, Fut, G>(
        &self,
        operation: &OperationId,
        call: F,
        fallback: G,
    ) -> Result<T, ExecuteError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Display + 'static,
        G: Fallback<T>,
    {
        self.execute_async_detailed(operation, call, fallback)
            .await
            .map(Served::into_inner)
    }

    /// Async form of [`Engine::execute_detailed`].
    pub async fn execute_async_detailed<T, E, F, Fut, G>(
        &self,
        operation: &OperationId,
        call: F,
        fallback: G,
    ) -> Result<Served<T>, ExecuteError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Display + 'static,
        G: Fallback<T>,
    {
        let breaker = self.registry.get_or_create(operation);
        match breaker.call_async(call).await {
            Ok(value) => Ok(Served::Live(value)),
            Err(error) => degrade(operation, error, fallback),
        }
    }
}

fn degrade<T, E, G>(
    operation: &OperationId,
    error: BreakerError<E>,
    fallback: G,
) -> Result<Served<T>, ExecuteError>
where
    E: Display + 'static,
    G: Fallback<T>,
{
    let reason = Degradation::from(&error);
    tracing::debug!(%operation, %reason, %error, "serving fallback");

    let value = fallback.compute(operation)?;
    Ok(Served::Degraded { value, reason })
}
