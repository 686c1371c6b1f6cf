#![cfg(feature = "async")]

use futures::future::BoxFuture;
use reading_breaker::adapter::RemoteCall;
use reading_breaker::reading::{ReadingListService, FALLBACK_READING_LIST, READING_LIST_OPERATION};
use reading_breaker::{
    BreakerConfig, BreakerRegistry, CallError, Degradation, Engine, EventLog, FailureKind,
    ManualClock, OperationId, State, TripPolicy, WindowPolicy,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RECOMMENDED: &str =
    "Spring in Action (Manning), Cloud Native Java (O'Reilly), Learning Spring Boot (Packt)";

/// Bookstore stand-in that can be taken down and brought back.
#[derive(Clone, Default)]
struct Bookstore {
    down: Arc<AtomicBool>,
    requests: Arc<AtomicUsize>,
}

impl Bookstore {
    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl RemoteCall for Bookstore {
    type Output = String;

    fn invoke(&self) -> BoxFuture<'_, Result<String, CallError>> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(CallError::Connection("connection refused".to_string()))
            } else {
                Ok(RECOMMENDED.to_string())
            }
        })
    }
}

struct World {
    service: ReadingListService<Bookstore>,
    bookstore: Bookstore,
    clock: Arc<ManualClock>,
    log: Arc<EventLog>,
    engine: Engine,
}

fn world() -> World {
    let clock = Arc::new(ManualClock::new());
    let log = Arc::new(EventLog::default());
    let config = BreakerConfig::default()
        .with_window(WindowPolicy::Count(10))
        .with_trip_policy(TripPolicy::FailureCount(5))
        .with_reset_timeout(Duration::from_secs(5));
    let registry = BreakerRegistry::builder()
        .operation(OperationId::from_static(READING_LIST_OPERATION), config)
        .metric_sink(log.clone())
        .clock(clock.clone())
        .build()
        .expect("valid config");
    let engine = Engine::new(Arc::new(registry));
    let bookstore = Bookstore::default();

    World {
        service: ReadingListService::new(engine.clone(), bookstore.clone()),
        bookstore,
        clock,
        log,
        engine,
    }
}

impl World {
    fn state(&self) -> State {
        self.engine
            .registry()
            .get_or_create(self.service.operation())
            .current_state()
    }
}

#[tokio::test]
async fn healthy_bookstore_is_served_live() {
    let w = world();

    for _ in 0..3 {
        let served = w.service.reading_list_detailed().await.expect("infallible");
        assert!(!served.is_degraded());
        assert_eq!(served.value(), RECOMMENDED);
    }
    assert_eq!(w.bookstore.requests(), 3);
    assert_eq!(w.state(), State::Closed);
}

#[tokio::test]
async fn outage_opens_the_circuit_and_serves_fallback() {
    let w = world();
    w.bookstore.down.store(true, Ordering::SeqCst);

    for call in 1..=10 {
        let served = w.service.reading_list_detailed().await.expect("infallible");
        assert_eq!(served.value(), FALLBACK_READING_LIST);

        if call <= 5 {
            assert_eq!(
                served.reason(),
                Some(Degradation::Failed(FailureKind::Connection))
            );
        } else {
            assert_eq!(served.reason(), Some(Degradation::Rejected));
        }
        if call == 5 {
            assert_eq!(w.state(), State::Open);
        }
    }

    // Rejected calls never reach the bookstore.
    assert_eq!(w.bookstore.requests(), 5);

    let counts = w
        .log
        .operation(w.service.operation())
        .expect("operation seen");
    assert_eq!(counts.failures, 5);
    assert_eq!(counts.rejected, 5);
    assert_eq!(counts.state, State::Open);
}

#[tokio::test]
async fn recovery_closes_the_circuit() {
    let w = world();
    w.bookstore.down.store(true, Ordering::SeqCst);
    for _ in 0..10 {
        w.service.reading_list().await.expect("infallible");
    }
    assert_eq!(w.state(), State::Open);

    // Still inside the reset timeout.
    w.bookstore.down.store(false, Ordering::SeqCst);
    w.clock.advance(Duration::from_secs(4));
    assert_eq!(
        w.service.reading_list().await.as_deref(),
        Ok(FALLBACK_READING_LIST)
    );
    assert_eq!(w.bookstore.requests(), 5);

    w.clock.advance(Duration::from_secs(1));
    let trial = w.service.reading_list_detailed().await.expect("infallible");
    assert!(!trial.is_degraded());
    assert_eq!(w.state(), State::Closed);

    for _ in 0..5 {
        assert_eq!(w.service.reading_list().await.as_deref(), Ok(RECOMMENDED));
    }
    assert_eq!(w.bookstore.requests(), 11);

    let transitions: Vec<_> = w
        .log
        .snapshot()
        .transitions
        .into_iter()
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (State::Closed, State::Open),
            (State::Open, State::HalfOpen),
            (State::HalfOpen, State::Closed),
        ]
    );
}

#[tokio::test]
async fn failed_trial_keeps_serving_fallback() {
    let w = world();
    w.bookstore.down.store(true, Ordering::SeqCst);
    for _ in 0..5 {
        w.service.reading_list().await.expect("infallible");
    }

    w.clock.advance(Duration::from_secs(5));
    let trial = w.service.reading_list_detailed().await.expect("infallible");
    assert_eq!(
        trial.reason(),
        Some(Degradation::Failed(FailureKind::Connection))
    );
    assert_eq!(w.state(), State::Open);

    let next = w.service.reading_list_detailed().await.expect("infallible");
    assert_eq!(next.reason(), Some(Degradation::Rejected));
    assert_eq!(w.bookstore.requests(), 6);
}

#[cfg(feature = "http")]
#[tokio::test]
async fn unreachable_bookstore_over_http_falls_back() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let engine = Engine::new(Arc::new(BreakerRegistry::new()));
    let service = ReadingListService::over_http(engine, &format!("http://{}/recommended", addr))
        .expect("valid uri");

    let served = service.reading_list_detailed().await.expect("infallible");
    assert_eq!(served.value(), FALLBACK_READING_LIST);
    assert_eq!(
        served.reason(),
        Some(Degradation::Failed(FailureKind::Connection))
    );
}
