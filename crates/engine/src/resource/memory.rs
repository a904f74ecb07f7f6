//! In-memory resource provider
//!
//! Backend-free provider used by the synthetic service and by tests. It counts
//! every lifecycle call so callers can assert that resources are released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{OperationError, ResourceHandle, ResourceProvider};

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    closed: AtomicU64,
    refused: AtomicU64,
}

/// Snapshot of provider activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub acquired: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub closed: u64,
    pub refused: u64,
}

impl MemoryStats {
    /// Handles acquired but not yet closed
    pub fn open(&self) -> u64 {
        self.acquired - self.closed
    }
}

/// Provider handing out [`MemoryResource`]s
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    counters: Arc<Counters>,
    refuse_first: u64,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the first `n` acquisitions with a connection failure
    pub fn with_refused_acquisitions(mut self, n: u64) -> Self {
        self.refuse_first = n;
        self
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.counters;
        MemoryStats {
            acquired: c.acquired.load(Ordering::Acquire),
            committed: c.committed.load(Ordering::Acquire),
            rolled_back: c.rolled_back.load(Ordering::Acquire),
            closed: c.closed.load(Ordering::Acquire),
            refused: c.refused.load(Ordering::Acquire),
        }
    }
}

#[async_trait]
impl ResourceProvider for MemoryProvider {
    type Resource = MemoryResource;

    async fn acquire(&self) -> Result<MemoryResource, OperationError> {
        let refused = self.counters.refused.load(Ordering::Acquire);
        if refused < self.refuse_first {
            self.counters.refused.fetch_add(1, Ordering::AcqRel);
            return Err(OperationError::Connection("connection refused".to_string()));
        }

        self.counters.acquired.fetch_add(1, Ordering::AcqRel);
        Ok(MemoryResource {
            counters: Arc::clone(&self.counters),
            fail_commit: None,
        })
    }
}

/// Handle produced by [`MemoryProvider`]
#[derive(Debug)]
pub struct MemoryResource {
    counters: Arc<Counters>,
    fail_commit: Option<OperationError>,
}

impl MemoryResource {
    /// Make the next commit fail with `error`
    pub fn fail_commit_with(&mut self, error: OperationError) {
        self.fail_commit = Some(error);
    }
}

#[async_trait]
impl ResourceHandle for MemoryResource {
    async fn commit(&mut self) -> Result<(), OperationError> {
        if let Some(error) = self.fail_commit.take() {
            return Err(error);
        }
        self.counters.committed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), OperationError> {
        self.counters.rolled_back.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn close(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refuses_then_hands_out() {
        let provider = MemoryProvider::new().with_refused_acquisitions(2);

        assert!(matches!(
            provider.acquire().await,
            Err(OperationError::Connection(_))
        ));
        assert!(provider.acquire().await.is_err());

        let mut resource = provider.acquire().await.unwrap();
        resource.commit().await.unwrap();
        resource.close().await;

        let stats = provider.stats();
        assert_eq!(stats.refused, 2);
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.open(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_one_shot() {
        let provider = MemoryProvider::new();
        let mut resource = provider.acquire().await.unwrap();

        resource.fail_commit_with(OperationError::backend("40001", "serialization failure"));
        assert!(resource.commit().await.is_err());
        assert!(resource.commit().await.is_ok());
    }
}
