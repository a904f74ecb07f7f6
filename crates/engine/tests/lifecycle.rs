//! Lifecycle tests for worker pools and the container
//!
//! Run with: cargo test -p dash-engine --test lifecycle
//!
//! Everything runs against the in-memory provider; no database is needed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use dash_engine::config::DashConfig;
use dash_engine::container::{Container, ContainerStatus, StatusChangeEvent};
use dash_engine::prelude::*;

/// Fails the first `failures` attempts with a serialization conflict
#[derive(Default)]
struct Flaky {
    failures: u64,
    attempts: AtomicU64,
    succeeded: AtomicU64,
}

impl Flaky {
    fn failing(failures: u64) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Workload for Flaky {
    type Context = WorkerContext;
    type Provider = MemoryProvider;

    fn create_context(&self, worker: usize) -> WorkerContext {
        WorkerContext::new(worker)
    }

    async fn execute(
        &self,
        _operation: &OperationType,
        context: &mut WorkerContext,
        _resource: &mut MemoryResource,
    ) -> Result<(), OperationError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        if attempt < self.failures {
            return Err(OperationError::backend("40001", "could not serialize access"));
        }
        context.next_urn();
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn pool(workload: Flaky, provider: MemoryProvider, threads: usize) -> WorkerPool<Flaky> {
    let mix = Mix::new(&[70, 30], &["READ", "WRITE"]).unwrap();
    WorkerPool::new(
        "flaky",
        WorkerPoolConfig::default().with_thread_count(threads),
        mix,
        workload,
        provider,
    )
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[test_log::test(tokio::test)]
async fn test_start_before_create_is_noop() {
    let pool = pool(Flaky::default(), MemoryProvider::new(), 2);

    pool.start().await.unwrap();
    assert_eq!(pool.status(), ServiceStatus::Destroyed);
    assert_eq!(pool.workload().attempts.load(Ordering::SeqCst), 0);
}

#[test_log::test(tokio::test)]
async fn test_stop_before_start_keeps_created() {
    let pool = pool(Flaky::default(), MemoryProvider::new(), 2);
    pool.create().await.unwrap();

    pool.stop().await;
    assert_eq!(pool.status(), ServiceStatus::Created);

    pool.destroy().await;
    assert_eq!(pool.status(), ServiceStatus::Destroyed);
    assert_eq!(pool.remaining(), 0);
}

#[test_log::test(tokio::test)]
async fn test_destroy_drains_every_worker() {
    let provider = MemoryProvider::new();
    let pool = pool(Flaky::default(), provider.clone(), 4);

    pool.create().await.unwrap();
    assert_eq!(pool.remaining(), 4);
    pool.start().await.unwrap();

    wait_until(|| pool.workload().succeeded.load(Ordering::SeqCst) >= 20).await;
    pool.destroy().await;

    assert_eq!(pool.status(), ServiceStatus::Destroyed);
    assert_eq!(pool.remaining(), 0);
    // no handle outlives the drain
    assert_eq!(provider.stats().open(), 0);

    // a drained pool does no further work
    let done = pool.workload().attempts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.workload().attempts.load(Ordering::SeqCst), done);
}

#[test_log::test(tokio::test)]
async fn test_pool_can_be_recreated_after_destroy() {
    let pool = pool(Flaky::default(), MemoryProvider::new(), 2);

    pool.create().await.unwrap();
    pool.start().await.unwrap();
    pool.destroy().await;

    pool.create().await.unwrap();
    assert_eq!(pool.status(), ServiceStatus::Created);
    assert_eq!(pool.remaining(), 2);
    pool.destroy().await;
}

#[test_log::test(tokio::test)]
async fn test_transient_failures_are_retried_with_fresh_resources() {
    let provider = MemoryProvider::new();
    let timers = Arc::new(TimerRegistry::with_tags(["READ", "WRITE"]));
    let retry = RetryPolicy::new(
        RetryConfig::fixed(Duration::from_millis(1), 5),
        SqlStateClassifier,
    );
    let pool = pool(Flaky::failing(3), provider.clone(), 1)
        .with_retry(retry)
        .with_metrics(timers.clone());

    pool.create().await.unwrap();
    pool.start().await.unwrap();
    wait_until(|| pool.workload().succeeded.load(Ordering::SeqCst) >= 1).await;
    pool.destroy().await;

    let stats = provider.stats();
    assert!(stats.rolled_back >= 3, "{stats:?}");
    assert!(stats.committed >= 1, "{stats:?}");
    assert_eq!(stats.open(), 0);
    assert!(timers.total() >= 1);
}

#[test_log::test(tokio::test)]
async fn test_container_runs_until_stopped() {
    let config = DashConfig::from_properties([
        ("runner.class", "synthetic"),
        ("dash.driver.threads", "2"),
        ("dash.metrics.service.reporters", "none"),
    ])
    .unwrap();
    let container = Container::with_builtin(config);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    container.add_status_listener(move |event: &StatusChangeEvent| {
        sink.lock().push(event.clone());
    });

    let runner = container.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    wait_until(|| seen.lock().len() == 1).await;
    assert!(!handle.is_finished());
    let service = container.service().await.unwrap();
    assert_eq!(service.status(), ServiceStatus::Started);

    container.stop().await;
    handle.await.unwrap().unwrap();
    wait_until(|| seen.lock().len() == 2).await;

    assert_eq!(service.status(), ServiceStatus::Destroyed);
    assert_eq!(container.status().await, ContainerStatus::Stopped);

    let events = seen.lock().clone();
    let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
    assert_eq!(statuses, [ContainerStatus::Started, ContainerStatus::Stopped]);
    assert!(events.iter().all(|e| e.run_id == container.run_id()));
    assert!(events[0].at <= events[1].at);

    // repeated stops publish nothing
    container.stop().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(seen.lock().len(), 2);
}

// A listener that takes the container's state lock itself would hang forever
// if it were invoked while `start` or `stop` still held that lock.
#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_listeners_run_outside_the_state_lock() {
    let config = DashConfig::from_properties([
        ("runner.class", "synthetic"),
        ("dash.driver.threads", "1"),
        ("dash.metrics.service.reporters", "none"),
    ])
    .unwrap();
    let container = Container::with_builtin(config);

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    let reentrant = container.clone();
    container.add_status_listener(move |event: &StatusChangeEvent| {
        let status = futures::executor::block_on(reentrant.status());
        sink.lock().push((event.status, status));
    });

    let runner = container.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    wait_until(|| observed.lock().len() == 1).await;

    tokio::time::timeout(Duration::from_secs(5), container.stop())
        .await
        .expect("stop blocked by a listener");
    handle.await.unwrap().unwrap();
    wait_until(|| observed.lock().len() == 2).await;

    assert_eq!(
        *observed.lock(),
        [
            (ContainerStatus::Started, ContainerStatus::Started),
            (ContainerStatus::Stopped, ContainerStatus::Stopped),
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_panicking_listener_does_not_block_others() {
    let container = Container::new(DashConfig::default(), custom_registry());

    container.add_status_listener(|_: &StatusChangeEvent| panic!("listener failure"));
    let count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&count);
    container.add_status_listener(move |_: &StatusChangeEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let runner = container.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    wait_until(|| count.load(Ordering::SeqCst) == 1).await;

    container.stop().await;
    handle.await.unwrap().unwrap();
    wait_until(|| count.load(Ordering::SeqCst) == 2).await;
}

#[test_log::test(tokio::test)]
async fn test_container_resolves_custom_service() {
    let mut config = DashConfig::default();
    config.service = "flaky".to_string();
    let container = Container::new(config, custom_registry());

    let runner = container.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    let service = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(service) = container.service().await {
                break service;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("service never started");
    assert_eq!(service.name(), "flaky");

    container.stop().await;
    handle.await.unwrap().unwrap();
    assert_eq!(service.status(), ServiceStatus::Destroyed);
}

fn custom_registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register("flaky", |_config: &DashConfig| {
        let service: Arc<dyn Service> = Arc::new(pool(Flaky::default(), MemoryProvider::new(), 2));
        Ok(service)
    });
    registry.register("synthetic", |_config: &DashConfig| {
        let service: Arc<dyn Service> = Arc::new(pool(Flaky::default(), MemoryProvider::new(), 1));
        Ok(service)
    });
    registry
}
