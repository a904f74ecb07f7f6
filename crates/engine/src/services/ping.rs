//! Database ping service
//!
//! One `PING` tag running `SELECT 1` in its own transaction. Measures the
//! round-trip floor of the backend under the configured concurrency.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::DashConfig;
use crate::resource::{OperationError, PgResource, PgResourceProvider};
use crate::service::{Service, ServiceError, Workload};
use crate::workload::{OperationType, WorkerContext};

/// Registered service name
pub const NAME: &str = "ping";

pub const PING: &str = "PING";

const PING_SQL: &str = "SELECT 1";

/// The ping workload
#[derive(Debug, Clone, Default)]
pub struct PingWorkload {
    skip_init: bool,
}

impl PingWorkload {
    pub fn new(skip_init: bool) -> Self {
        Self { skip_init }
    }
}

#[async_trait]
impl Workload for PingWorkload {
    type Context = WorkerContext;
    type Provider = PgResourceProvider;

    async fn setup(&self, provider: &PgResourceProvider) -> Result<(), OperationError> {
        if self.skip_init {
            return Ok(());
        }
        let one: i32 = sqlx::query_scalar(PING_SQL).fetch_one(provider.pool()).await?;
        info!(result = one, "Database reachable");
        Ok(())
    }

    fn create_context(&self, worker: usize) -> WorkerContext {
        WorkerContext::new(worker)
    }

    async fn execute(
        &self,
        operation: &OperationType,
        _context: &mut WorkerContext,
        resource: &mut PgResource,
    ) -> Result<(), OperationError> {
        match operation.tag() {
            PING => {
                let _: i32 = sqlx::query_scalar(PING_SQL)
                    .fetch_one(resource.connection()?)
                    .await?;
                Ok(())
            }
            other => Err(OperationError::Fatal(format!("unknown tag: {other}"))),
        }
    }
}

/// Build the ping service from configuration
pub fn build(config: &DashConfig) -> Result<Arc<dyn Service>, ServiceError> {
    let url = config.database.url.as_deref().ok_or_else(|| {
        ServiceError::Config("the ping service needs dash.db.url or DATABASE_URL".to_string())
    })?;
    let mix = config.workload.mix_or(&[100], &[PING])?;
    let provider = PgResourceProvider::connect_lazy(url, config.max_connections())
        .map_err(ServiceError::Resource)?;
    let workload = PingWorkload::new(config.database.skip_init);
    let pool = super::assemble(NAME, config, mix, workload, provider)?;
    Ok(Arc::new(pool))
}
