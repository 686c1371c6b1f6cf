//! The reading-list call site: recommended books from the bookstore service.

use crate::adapter::RemoteCall;
use crate::engine::Engine;
use crate::error::ExecuteError;
use crate::fallback::{Served, StaticFallback};
use crate::registry::OperationId;

/// Where the bookstore publishes its recommendations.
pub const RECOMMENDED_URI: &str = "http://localhost:8090/recommended";

/// Reading list served while the bookstore is unavailable.
pub const FALLBACK_READING_LIST: &str = "Cloud Native Java (O'Reilly)";

/// Operation identity of the recommendation call.
pub const READING_LIST_OPERATION: &str = "bookstore.recommended";

/// Builds reading lists from bookstore recommendations, degrading to a fixed
/// list when the bookstore is slow or down.
pub struct ReadingListService<R> {
    engine: Engine,
    remote: R,
    operation: OperationId,
    fallback: StaticFallback<String>,
}

impl<R> ReadingListService<R>
where
    R: RemoteCall<Output = String>,
{
    /// Creates the service over an explicit engine and remote.
    pub fn new(engine: Engine, remote: R) -> Self {
        Self {
            engine,
            remote,
            operation: OperationId::from_static(READING_LIST_OPERATION),
            fallback: StaticFallback::new(FALLBACK_READING_LIST.to_string()),
        }
    }

    /// Operation identity the service's breaker is registered under.
    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    /// The books to read: the bookstore's answer, or the fallback list.
    pub async fn reading_list(&self) -> Result<String, ExecuteError> {
        self.engine
            .execute_async(&self.operation, || self.remote.invoke(), &self.fallback)
            .await
    }

    /// Same as [`reading_list`](Self::reading_list), tagged as live or degraded.
    pub async fn reading_list_detailed(&self) -> Result<Served<String>, ExecuteError> {
        self.engine
            .execute_async_detailed(&self.operation, || self.remote.invoke(), &self.fallback)
            .await
    }
}

#[cfg(feature = "http")]
impl ReadingListService<crate::adapter::HttpAdapter> {
    /// Creates the service calling the bookstore at `uri` over HTTP.
    ///
    /// The adapter's timeout is the operation's configured `call_timeout`.
    pub fn over_http(engine: Engine, uri: &str) -> Result<Self, crate::error::ConfigError> {
        let operation = OperationId::from_static(READING_LIST_OPERATION);
        let timeout = engine.registry().get_or_create(&operation).config().call_timeout;
        let adapter = crate::adapter::HttpAdapter::new(uri, timeout)?;
        Ok(Self::new(engine, adapter))
    }
}
