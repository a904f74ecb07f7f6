//! Per-worker context

use rand::distributions::Alphanumeric;
use rand::Rng;

const IDENTITY_LEN: usize = 15;

/// Private state of one worker
///
/// Created once per worker when the pool is created and owned by that worker
/// for its whole life, so none of its fields need synchronization.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker: usize,
    identity: String,
    counter: u64,
}

impl WorkerContext {
    /// Create a context with a random identity
    pub fn new(worker: usize) -> Self {
        let identity: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(IDENTITY_LEN)
            .map(char::from)
            .collect();
        Self::with_identity(worker, identity)
    }

    /// Create a context with a fixed identity
    pub fn with_identity(worker: usize, identity: impl Into<String>) -> Self {
        Self {
            worker,
            identity: identity.into(),
            counter: 0,
        }
    }

    /// Index of the owning worker within its pool
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current counter value
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Advance the counter and return the new value
    pub fn increment(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Allocate a new unique resource name (`identity:counter`)
    pub fn next_urn(&mut self) -> String {
        let n = self.increment();
        format!("{}:{}", self.identity, n)
    }

    /// A previously allocated resource name, if any were allocated
    pub fn random_urn<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        if self.counter == 0 {
            return None;
        }
        let n = rng.gen_range(1..=self.counter);
        Some(format!("{}:{}", self.identity, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_random_alphanumeric() {
        let a = WorkerContext::new(0);
        let b = WorkerContext::new(1);
        assert_eq!(a.identity().len(), IDENTITY_LEN);
        assert!(a.identity().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.identity(), b.identity());
        assert_eq!(b.worker(), 1);
    }

    #[test]
    fn test_urns_are_monotonic() {
        let mut ctx = WorkerContext::with_identity(0, "acct");
        assert!(ctx.random_urn(&mut rand::thread_rng()).is_none());

        assert_eq!(ctx.next_urn(), "acct:1");
        assert_eq!(ctx.next_urn(), "acct:2");
        assert_eq!(ctx.counter(), 2);

        let urn = ctx.random_urn(&mut rand::thread_rng()).unwrap();
        assert!(urn == "acct:1" || urn == "acct:2");
    }
}
