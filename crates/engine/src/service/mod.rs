//! Runnable workload services
//!
//! This module provides:
//! - [`Service`] - Lifecycle contract the container drives
//! - [`WorkerPool`] - Service running a [`Workload`] on N concurrent workers
//! - [`ServiceRegistry`] - Name to factory table used to pick a service

mod latch;
mod pool;
mod registry;
mod status;

use async_trait::async_trait;

use crate::reliability::{LimiterError, RetryError};
use crate::resource::OperationError;
use crate::workload::MixError;

pub use latch::{CompletionLatch, LatchGuard};
pub use pool::{default_thread_count, ResourceOf, WorkerPool, WorkerPoolConfig, Workload};
pub use registry::{ServiceFactory, ServiceRegistry};
pub use status::{ServiceStatus, StatusCell};

/// A runnable workload definition
///
/// Phases run in order `create -> start -> stop -> destroy`; every phase is
/// guarded so calling it out of order, or twice, does nothing.
#[async_trait]
pub trait Service: Send + Sync {
    /// Registered name
    fn name(&self) -> &str;

    /// Current lifecycle status
    fn status(&self) -> ServiceStatus;

    /// Allocate workers and per-worker state
    async fn create(&self) -> Result<(), ServiceError>;

    /// Launch the workers
    async fn start(&self) -> Result<(), ServiceError>;

    /// Signal every worker to finish
    async fn stop(&self);

    /// Stop, then wait for every worker to finish
    async fn destroy(&self);
}

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Invalid service configuration
    #[error("invalid service configuration: {0}")]
    Config(String),

    /// Invalid operation mix
    #[error("invalid mix: {0}")]
    Mix(#[from] MixError),

    /// Rate limiter failure
    #[error("rate limiter: {0}")]
    Limiter(#[from] LimiterError),

    /// No factory registered under the name
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Resource setup failed
    #[error("resource setup failed")]
    Resource(#[source] OperationError),

    /// A worker hit a condition that stops the pool
    #[error("fatal worker failure")]
    Fatal(#[source] RetryError),

    /// A worker panicked
    #[error("worker {0} panicked")]
    Panicked(usize),
}
