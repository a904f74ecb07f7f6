//! Worker pool for workload execution
//!
//! Runs N independent workers, each looping over
//! `pick tag -> pace -> execute under retry` until the pool is stopped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::latch::{CompletionLatch, LatchGuard};
use super::status::{ServiceStatus, StatusCell};
use super::{Service, ServiceError};
use crate::error::all_causes;
use crate::metrics::{ConsoleReporter, MetricsSink, NoopSink};
use crate::reliability::{Limiter, RetryError, RetryPolicy, Unlimited};
use crate::resource::{Operation, OperationError, ResourceProvider};
use crate::workload::{Mix, OperationType};

/// Resource handed to a workload's operations
pub type ResourceOf<W> = <<W as Workload>::Provider as ResourceProvider>::Resource;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub thread_count: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
        }
    }
}

impl WorkerPoolConfig {
    /// Set the worker count
    pub fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }
}

/// Available parallelism times four
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 4
}

/// Business logic run by a [`WorkerPool`]
///
/// The pool owns pacing, retries and lifecycle; a workload only says what one
/// operation does for a given tag.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Per-worker state, owned by exactly one worker
    type Context: Send + 'static;

    /// Source of a fresh resource for every attempt
    type Provider: ResourceProvider;

    /// One-time preparation when the pool is created
    async fn setup(&self, _provider: &Self::Provider) -> Result<(), OperationError> {
        Ok(())
    }

    /// Build the context for worker `worker`
    fn create_context(&self, worker: usize) -> Self::Context;

    /// Tokens to take from the limiter for the next iteration
    fn token_count(&self, _context: &Self::Context) -> u32 {
        1
    }

    /// Run one operation of type `operation`
    ///
    /// May run more than once per iteration if an earlier attempt failed
    /// transiently; each attempt gets a fresh resource.
    async fn execute(
        &self,
        operation: &OperationType,
        context: &mut Self::Context,
        resource: &mut ResourceOf<Self>,
    ) -> Result<(), OperationError>;
}

/// A worker's slot: its context plus its share of the completion latch
struct WorkerSlot<C> {
    context: C,
    guard: LatchGuard,
}

struct PoolInner<W: Workload> {
    name: String,
    config: WorkerPoolConfig,
    workload: W,
    provider: W::Provider,
    mix: Mix,
    limiter: Arc<dyn Limiter>,
    retry: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
    reporter: Option<ConsoleReporter>,
    status: StatusCell,
    cancel: Mutex<CancellationToken>,
    latch: Mutex<Arc<CompletionLatch>>,
    slots: Mutex<Vec<WorkerSlot<W::Context>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<W: Workload> PoolInner<W> {
    /// `Started -> Stopped` and wake every worker; no-op otherwise
    fn halt(&self) -> bool {
        if !self
            .status
            .transition(ServiceStatus::Started, ServiceStatus::Stopped)
        {
            return false;
        }
        self.cancel.lock().cancel();
        info!(service = %self.name, "Worker pool stopped");
        true
    }
}

/// Service running a [`Workload`] on a fixed set of concurrent workers
///
/// Every worker shares one rate limiter and one retry policy. A fresh pool is
/// `Destroyed`; [`create`](Service::create) allocates worker slots and
/// [`start`](Service::start) launches them.
///
/// # Example
///
/// ```ignore
/// use dash_engine::service::{Service, WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new("ping", WorkerPoolConfig::default(), mix, workload, provider)
///     .with_limiter(Arc::new(TokenBucket::new(&RateLimiterConfig::new(500))?));
///
/// pool.create().await?;
/// pool.start().await?;
/// // ... later
/// pool.destroy().await;
/// ```
pub struct WorkerPool<W: Workload> {
    inner: Arc<PoolInner<W>>,
}

impl<W: Workload> WorkerPool<W> {
    /// Create a new worker pool
    pub fn new(
        name: impl Into<String>,
        config: WorkerPoolConfig,
        mix: Mix,
        workload: W,
        provider: W::Provider,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                config,
                workload,
                provider,
                mix,
                limiter: Arc::new(Unlimited),
                retry: RetryPolicy::default(),
                metrics: Arc::new(NoopSink),
                reporter: None,
                status: StatusCell::default(),
                cancel: Mutex::new(CancellationToken::new()),
                latch: Mutex::new(CompletionLatch::new(0)),
                slots: Mutex::new(Vec::new()),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Set the shared rate limiter
    pub fn with_limiter(self, limiter: Arc<dyn Limiter>) -> Self {
        self.configure(|inner| inner.limiter = limiter)
    }

    /// Set the retry policy
    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        self.configure(|inner| inner.retry = retry)
    }

    /// Set the metrics sink
    pub fn with_metrics(self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.configure(|inner| inner.metrics = metrics)
    }

    /// Run `reporter` between start and stop
    pub fn with_reporter(self, reporter: ConsoleReporter) -> Self {
        self.configure(|inner| inner.reporter = Some(reporter))
    }

    fn configure(mut self, apply: impl FnOnce(&mut PoolInner<W>)) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => apply(inner),
            None => warn!("Worker pool already shared, configuration ignored"),
        }
        self
    }

    pub fn thread_count(&self) -> usize {
        self.inner.config.thread_count
    }

    pub fn mix(&self) -> &Mix {
        &self.inner.mix
    }

    pub fn workload(&self) -> &W {
        &self.inner.workload
    }

    pub fn provider(&self) -> &W::Provider {
        &self.inner.provider
    }

    /// Workers that have not finished yet
    pub fn remaining(&self) -> usize {
        self.inner.latch.lock().remaining()
    }

    fn spawn_worker(
        &self,
        worker: usize,
        slot: WorkerSlot<W::Context>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let WorkerSlot { mut context, guard } = slot;
            debug!(worker, "Worker started");

            let outcome = AssertUnwindSafe(run_worker(&inner, &cancel, worker, &mut context))
                .catch_unwind()
                .await;

            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(ServiceError::Panicked(worker)),
            };
            if let Some(e) = fault {
                error!(worker, error = %all_causes(&e), "Worker failed, stopping pool");
                inner.halt();
            }

            debug!(worker, "Worker exited");
            drop(guard);
        })
    }
}

/// One worker's loop; returns `Err` only for conditions that stop the pool
async fn run_worker<W: Workload>(
    inner: &PoolInner<W>,
    cancel: &CancellationToken,
    worker: usize,
    context: &mut W::Context,
) -> Result<(), ServiceError> {
    let mut rng = StdRng::from_entropy();

    while !cancel.is_cancelled() && !inner.status.get().is_halted() {
        let operation = inner.mix.pick(&mut rng);

        let cost = inner.workload.token_count(context);
        if cost == 0 {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            consumed = inner.limiter.consume(cost) => consumed?,
        }

        for _ in 0..cost {
            let started = Instant::now();
            let mut invocation = Invocation {
                workload: &inner.workload,
                operation,
                context: &mut *context,
            };

            match inner.retry.action(&inner.provider, &mut invocation, cancel).await {
                Ok(()) => inner.metrics.record(operation.tag(), started.elapsed()),
                Err(RetryError::Cancelled) => {
                    debug!(worker, tag = operation.tag(), "Operation cancelled");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(ServiceError::Fatal(e)),
                Err(e) => {
                    inner.metrics.record_failure(operation.tag());
                    warn!(worker, tag = operation.tag(), "{}", all_causes(&e));
                }
            }
        }
    }

    Ok(())
}

/// Binds a workload call to its worker's context for one retry loop
struct Invocation<'a, W: Workload> {
    workload: &'a W,
    operation: &'a OperationType,
    context: &'a mut W::Context,
}

#[async_trait]
impl<'a, W: Workload> Operation<ResourceOf<W>> for Invocation<'a, W> {
    type Output = ();

    async fn run(&mut self, resource: &mut ResourceOf<W>) -> Result<(), OperationError> {
        self.workload
            .execute(self.operation, &mut *self.context, resource)
            .await
    }
}

#[async_trait]
impl<W: Workload> Service for WorkerPool<W> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn status(&self) -> ServiceStatus {
        self.inner.status.get()
    }

    #[instrument(skip(self), fields(service = %self.inner.name))]
    async fn create(&self) -> Result<(), ServiceError> {
        let count = self.inner.config.thread_count;
        if count == 0 {
            return Err(ServiceError::Config(
                "thread count must be greater than zero".to_string(),
            ));
        }

        if self.status() != ServiceStatus::Destroyed {
            debug!(status = %self.status(), "Create ignored");
            return Ok(());
        }
        self.inner
            .workload
            .setup(&self.inner.provider)
            .await
            .map_err(ServiceError::Resource)?;

        let mut slots = self.inner.slots.lock();
        if !self
            .inner
            .status
            .transition(ServiceStatus::Destroyed, ServiceStatus::Created)
        {
            debug!(status = %self.status(), "Create ignored");
            return Ok(());
        }

        let latch = CompletionLatch::new(count);
        *slots = (0..count)
            .map(|worker| WorkerSlot {
                context: self.inner.workload.create_context(worker),
                guard: latch.guard(),
            })
            .collect();
        *self.inner.latch.lock() = latch;
        *self.inner.cancel.lock() = CancellationToken::new();

        info!(
            thread_count = count,
            tags = ?self.inner.mix.tags().collect::<Vec<_>>(),
            "Worker pool created"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(service = %self.inner.name))]
    async fn start(&self) -> Result<(), ServiceError> {
        if !self
            .inner
            .status
            .transition(ServiceStatus::Created, ServiceStatus::Started)
        {
            debug!(status = %self.status(), "Start ignored");
            return Ok(());
        }

        let slots = std::mem::take(&mut *self.inner.slots.lock());
        let cancel = self.inner.cancel.lock().clone();
        let handles: Vec<_> = slots
            .into_iter()
            .enumerate()
            .map(|(worker, slot)| self.spawn_worker(worker, slot, cancel.clone()))
            .collect();
        *self.inner.handles.lock() = handles;

        if let Some(reporter) = &self.inner.reporter {
            reporter.start();
        }

        info!(thread_count = self.thread_count(), "Worker pool started");
        Ok(())
    }

    #[instrument(skip(self), fields(service = %self.inner.name))]
    async fn stop(&self) {
        self.inner.halt();
        if let Some(reporter) = &self.inner.reporter {
            reporter.stop().await;
        }
    }

    #[instrument(skip(self), fields(service = %self.inner.name))]
    async fn destroy(&self) {
        self.stop().await;

        // never started: the slots hold the only guards
        if self
            .inner
            .status
            .transition(ServiceStatus::Created, ServiceStatus::Destroyed)
        {
            self.inner.slots.lock().clear();
            info!("Worker pool destroyed");
            return;
        }

        if !self
            .inner
            .status
            .transition(ServiceStatus::Stopped, ServiceStatus::Destroyed)
        {
            debug!(status = %self.status(), "Destroy ignored");
            return;
        }

        let latch = Arc::clone(&self.inner.latch.lock());
        info!(remaining = latch.remaining(), "Waiting for workers to drain");
        latch.wait().await;

        let handles = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "Worker task ended abnormally");
            }
        }

        info!("Worker pool destroyed");
    }
}
