//! # Dash Workload Engine
//!
//! Drives configurable synthetic operations against a database at controlled
//! concurrency and rate, measuring throughput and latency while riding out
//! transient backend failures.
//!
//! ## Features
//!
//! - **Weighted operation mix**: Pick the next operation tag from configured percentages
//! - **Shared rate limiting**: One token bucket paces every worker
//! - **Automatic retries**: Randomized binary exponential backoff with SQLSTATE classification
//! - **Clean lifecycle**: Guarded create/start/stop/destroy with full worker drain
//! - **Per-tag timers**: Latency percentiles and throughput reported periodically
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Container                             │
//! │  (resolves one service by name, blocks until stopped)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  (N workers: Mix -> TokenBucket -> RetryPolicy -> Workload) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ResourceProvider                          │
//! │  (fresh transaction per attempt: PostgreSQL or in-memory)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use dash_engine::prelude::*;
//!
//! struct Orders;
//!
//! #[async_trait]
//! impl Workload for Orders {
//!     type Context = WorkerContext;
//!     type Provider = PgResourceProvider;
//!
//!     fn create_context(&self, worker: usize) -> WorkerContext {
//!         WorkerContext::new(worker)
//!     }
//!
//!     async fn execute(
//!         &self,
//!         operation: &OperationType,
//!         context: &mut WorkerContext,
//!         resource: &mut PgResource,
//!     ) -> Result<(), OperationError> {
//!         // ... run the statement for operation.tag()
//!         Ok(())
//!     }
//! }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod metrics;
pub mod reliability;
pub mod resource;
pub mod service;
pub mod services;
pub mod telemetry;
pub mod workload;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, DashConfig};
    pub use crate::container::{Container, ContainerError, ContainerStatus, StatusChangeEvent};
    pub use crate::metrics::{MetricsSink, TimerRegistry};
    pub use crate::reliability::{
        FailureClass, FailureClassifier, Limiter, RateLimiterConfig, RetryConfig, RetryError,
        RetryPolicy, SqlStateClassifier, TokenBucket,
    };
    pub use crate::resource::{
        MemoryProvider, MemoryResource, Operation, OperationError, PgResource,
        PgResourceProvider, ResourceHandle, ResourceProvider,
    };
    pub use crate::service::{
        Service, ServiceError, ServiceRegistry, ServiceStatus, WorkerPool, WorkerPoolConfig,
        Workload,
    };
    pub use crate::workload::{Mix, MixError, OperationType, WorkerContext};
    pub use async_trait::async_trait;
}
