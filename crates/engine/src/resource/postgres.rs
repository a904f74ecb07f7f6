//! PostgreSQL resource provider
//!
//! Every acquisition opens a transaction on a pooled connection. Pool sizing is
//! left to the caller; this type only maps the resource lifecycle onto the
//! transaction.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::debug;

use super::{OperationError, ResourceHandle, ResourceProvider};

/// Provider backed by a [`PgPool`]
#[derive(Debug, Clone)]
pub struct PgResourceProvider {
    pool: PgPool,
}

impl PgResourceProvider {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect lazily; connection failures surface on the first acquisition
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, OperationError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResourceProvider for PgResourceProvider {
    type Resource = PgResource;

    async fn acquire(&self) -> Result<PgResource, OperationError> {
        let tx = self.pool.begin().await?;
        Ok(PgResource { tx: Some(tx) })
    }
}

/// An open transaction
pub struct PgResource {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgResource {
    /// Connection to run statements on
    pub fn connection(&mut self) -> Result<&mut PgConnection, OperationError> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(OperationError::Connection(
                "transaction already finished".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ResourceHandle for PgResource {
    async fn commit(&mut self) -> Result<(), OperationError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), OperationError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        // Dropping an unfinished transaction queues a rollback on its connection
        if self.tx.take().is_some() {
            debug!("Closing unfinished transaction");
        }
    }
}
