//! Backend resources
//!
//! A [`ResourceProvider`] opens one [`ResourceHandle`] per attempt; an
//! [`Operation`] runs against it. The retry engine owns the handle for the
//! duration of the attempt and always commits or rolls back, then closes it.

mod memory;
mod postgres;

use async_trait::async_trait;

pub use memory::{MemoryProvider, MemoryResource, MemoryStats};
pub use postgres::{PgResource, PgResourceProvider};

/// Failure raised by a provider or an operation
///
/// Carries the backend's own signal (for SQL backends, the SQLSTATE) so a
/// [`FailureClassifier`](crate::reliability::FailureClassifier) can decide
/// whether the failure is worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The backend is unreachable or the connection broke mid-flight
    #[error("connection failure: {0}")]
    Connection(String),

    /// The backend rejected the work with a signal code
    #[error("{message} (code {code})")]
    Backend { code: String, message: String },

    /// The operation was abandoned because the pool is stopping
    #[error("operation cancelled")]
    Cancelled,

    /// A pool-level condition no retry can fix; stops the whole pool
    #[error("fatal: {0}")]
    Fatal(String),

    /// Anything without a backend code
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OperationError {
    /// Build a backend error from a signal code and message
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Backend signal code, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Backend { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<sqlx::Error> for OperationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => Self::Backend {
                code: db.code().map(|c| c.into_owned()).unwrap_or_default(),
                message: db.message().to_string(),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection(err.to_string()),
            other => Self::Other(anyhow::Error::new(other)),
        }
    }
}

/// A transactional handle to the backend
#[async_trait]
pub trait ResourceHandle: Send {
    /// Make the attempt's work durable
    async fn commit(&mut self) -> Result<(), OperationError>;

    /// Discard the attempt's work
    async fn rollback(&mut self) -> Result<(), OperationError>;

    /// Release the handle; called exactly once, after commit or rollback
    async fn close(&mut self);
}

/// Opens a fresh resource for every attempt
#[async_trait]
pub trait ResourceProvider: Send + Sync + 'static {
    type Resource: ResourceHandle + 'static;

    async fn acquire(&self) -> Result<Self::Resource, OperationError>;
}

/// One unit of work run against a resource
///
/// Implementations are called once per attempt and may be called again after
/// a transient failure, always with a fresh resource.
#[async_trait]
pub trait Operation<R: Send>: Send {
    type Output: Send;

    async fn run(&mut self, resource: &mut R) -> Result<Self::Output, OperationError>;
}
