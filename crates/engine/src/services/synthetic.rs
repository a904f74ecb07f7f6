//! Backend-free synthetic service
//!
//! Simulates a key-value workload over an in-memory provider: operations
//! sleep for a configurable latency and fail transiently at a configurable
//! ratio. Useful for smoke-testing the harness itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::DashConfig;
use crate::resource::{MemoryProvider, MemoryResource, OperationError};
use crate::service::{Service, ServiceError, Workload};
use crate::workload::{OperationType, WorkerContext};

/// Registered service name
pub const NAME: &str = "synthetic";

pub const READ: &str = "READ";
pub const WRITE: &str = "WRITE";
pub const SCAN: &str = "SCAN";

/// Synthetic workload settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Mean simulated operation latency
    #[serde(with = "crate::reliability::duration_millis")]
    pub latency: Duration,

    /// Share of attempts failing with a serialization error, 0.0 to 1.0
    pub failure_ratio: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(1),
            failure_ratio: 0.0,
        }
    }
}

/// The synthetic workload
#[derive(Debug, Clone)]
pub struct SyntheticWorkload {
    config: SyntheticConfig,
}

impl SyntheticWorkload {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Workload for SyntheticWorkload {
    type Context = WorkerContext;
    type Provider = MemoryProvider;

    fn create_context(&self, worker: usize) -> WorkerContext {
        WorkerContext::new(worker)
    }

    async fn execute(
        &self,
        operation: &OperationType,
        context: &mut WorkerContext,
        _resource: &mut MemoryResource,
    ) -> Result<(), OperationError> {
        let scale = match operation.tag() {
            READ => {
                // reads only touch keys this worker already wrote
                let mut rng = rand::thread_rng();
                if context.random_urn(&mut rng).is_none() {
                    context.next_urn();
                }
                1
            }
            WRITE => {
                context.next_urn();
                1
            }
            SCAN => 4,
            _ => 1,
        };

        let (delay, fail) = {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.5..1.5);
            let ratio = self.config.failure_ratio.clamp(0.0, 1.0);
            let fail = ratio > 0.0 && rng.gen_bool(ratio);
            (self.config.latency.mul_f64(jitter) * scale, fail)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(OperationError::backend(
                "40001",
                "could not serialize access due to concurrent update",
            ));
        }
        Ok(())
    }
}

/// Build the synthetic service from configuration
pub fn build(config: &DashConfig) -> Result<Arc<dyn Service>, ServiceError> {
    let mix = config
        .workload
        .mix_or(&[60, 30, 10], &[READ, WRITE, SCAN])?;
    let workload = SyntheticWorkload::new(config.synthetic.clone());
    let pool = super::assemble(NAME, config, mix, workload, MemoryProvider::new())?;
    Ok(Arc::new(pool))
}
