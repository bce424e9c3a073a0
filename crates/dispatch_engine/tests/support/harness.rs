//! Test harness: fast engine configuration, engine spin-up against in-memory
//! stores, and polling assertions for eventually-consistent state.

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use dispatch_engine::config::{EngineConfig, RetryPolicy};
use dispatch_engine::engine::Engine;
use dispatch_engine::memory::MemoryStore;
use dispatch_engine::store::DocumentStore;
use dispatch_engine::telemetry::DispatchTelemetry;

/// Engine config with test-speed retries and the re-sweep off, so tests
/// control every trigger explicitly unless they opt back in.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        pending_resweep_secs: 0,
        retry: fast_retry(),
        ..EngineConfig::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        max_attempts: 5,
    }
}

/// Install the test log subscriber once. Run tests with
/// `RUST_LOG=dispatch_engine=debug` to watch engine decisions.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Spawn the engine over the given stores and hand back its telemetry. The
/// engine task runs until the test's runtime shuts down.
pub fn start_engine(
    passenger: &MemoryStore,
    driver: &MemoryStore,
    config: EngineConfig,
) -> Arc<DispatchTelemetry> {
    init_tracing();
    let engine = Engine::new(
        Arc::new(passenger.clone()),
        Arc::new(driver.clone()),
        config,
    );
    let telemetry = engine.telemetry();
    tokio::spawn(async move {
        engine.run().await.expect("engine startup");
    });
    telemetry
}

/// Poll `check` until it returns true or two seconds elapse.
pub async fn eventually<F, Fut>(description: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {description}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Like [`eventually`] but with a caller-chosen deadline, for slow triggers
/// such as the pending re-sweep.
pub async fn eventually_within<F, Fut>(description: &str, deadline: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + deadline;
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {description}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Current value of one field, `Null` when the document or field is absent.
pub async fn field(store: &MemoryStore, collection: &str, id: &str, name: &str) -> Value {
    store
        .get(collection, id)
        .await
        .expect("store get")
        .and_then(|doc| doc.data.get(name).cloned())
        .unwrap_or(Value::Null)
}

/// Hold long enough for any in-flight notifications to drain, then return.
/// For asserting that something did NOT happen.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(120)).await;
}
