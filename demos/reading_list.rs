//! Reading List Example
//!
//! This example demonstrates:
//! 1. Protecting a bookstore call with a per-operation circuit breaker
//! 2. Serving a fixed reading list while the bookstore is down
//! 3. Recovering once the reset timeout has elapsed
//!
//! Run with `RUST_LOG=reading_breaker=debug` to see every decision.

use futures::future::BoxFuture;
use reading_breaker::prelude::*;
use reading_breaker::reading::{ReadingListService, READING_LIST_OPERATION};
use reading_breaker::{CallError, EventLog, TripPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A bookstore we can switch off and on.
#[derive(Clone, Default)]
struct Bookstore {
    down: Arc<AtomicBool>,
}

impl RemoteCall for Bookstore {
    type Output = String;

    fn invoke(&self) -> BoxFuture<'_, Result<String, CallError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.down.load(Ordering::SeqCst) {
                Err(CallError::Connection("connection refused".to_string()))
            } else {
                Ok("Spring in Action (Manning), Cloud Native Java (O'Reilly), Learning Spring Boot (Packt)"
                    .to_string())
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reading_breaker=info")),
        )
        .init();

    println!("=== Reading List Example ===\n");

    let log = Arc::new(EventLog::default());
    let config = BreakerConfig::default()
        .with_window(WindowPolicy::Count(10))
        .with_trip_policy(TripPolicy::FailureCount(5))
        .with_reset_timeout(Duration::from_secs(2));
    let registry = BreakerRegistry::builder()
        .operation(OperationId::new(READING_LIST_OPERATION)?, config)
        .metric_sink(log.clone())
        .build()?;
    let engine = Engine::new(Arc::new(registry));

    let bookstore = Bookstore::default();
    let service = ReadingListService::new(engine.clone(), bookstore.clone());

    println!("Bookstore up:");
    for i in 1..=3 {
        println!("  {}: {}", i, service.reading_list().await?);
    }

    println!("\nBookstore down:");
    bookstore.down.store(true, Ordering::SeqCst);
    for i in 1..=10 {
        let served = service.reading_list_detailed().await?;
        let reason = served.reason().map(|r| r.to_string()).unwrap_or_default();
        println!("  {}: {} [{}]", i, served.value(), reason);
    }

    println!("\nBookstore back, waiting for the reset timeout...");
    bookstore.down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    for i in 1..=5 {
        println!("  {}: {}", i, service.reading_list().await?);
    }

    println!("\nObserved:");
    for op in log.snapshot().operations {
        println!(
            "  {} state={} successes={} failures={} timeouts={} rejected={}",
            op.operation, op.state, op.successes, op.failures, op.timeouts, op.rejected
        );
    }
    for transition in log.snapshot().transitions {
        println!("  {} -> {}", transition.from, transition.to);
    }

    Ok(())
}
