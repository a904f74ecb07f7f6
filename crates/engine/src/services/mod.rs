//! Built-in services
//!
//! - `ping` - `SELECT 1` against PostgreSQL
//! - `synthetic` - simulated operations, no backend needed

pub mod ping;
pub mod synthetic;

use std::sync::Arc;

use crate::config::DashConfig;
use crate::metrics::{ConsoleReporter, TimerRegistry};
use crate::reliability::{RetryPolicy, SqlStateClassifier, TokenBucket};
use crate::service::{ServiceError, ServiceRegistry, WorkerPool, WorkerPoolConfig, Workload};
use crate::workload::Mix;

pub use synthetic::SyntheticConfig;

/// Register every built-in service
pub fn register_builtin(registry: &mut ServiceRegistry) {
    registry.register(ping::NAME, ping::build);
    registry.register(synthetic::NAME, synthetic::build);
}

/// Wire a workload into a pool with the configured limiter, retry policy and
/// per-tag timers
pub fn assemble<W: Workload>(
    name: &str,
    config: &DashConfig,
    mix: Mix,
    workload: W,
    provider: W::Provider,
) -> Result<WorkerPool<W>, ServiceError> {
    let limiter = TokenBucket::new(&config.driver.rates)?;
    let retry = RetryPolicy::new(config.retry.clone(), SqlStateClassifier);
    let timers = Arc::new(TimerRegistry::with_tags(mix.tags()));
    let reporter = ConsoleReporter::new(Arc::clone(&timers), config.metrics.clone());

    let pool_config = WorkerPoolConfig::default().with_thread_count(config.driver.threads);
    Ok(WorkerPool::new(name, pool_config, mix, workload, provider)
        .with_limiter(Arc::new(limiter))
        .with_retry(retry)
        .with_metrics(timers)
        .with_reporter(reporter))
}
