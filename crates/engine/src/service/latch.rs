//! Completion latch for worker drain

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counts down once per finished worker
///
/// Workers hold a [`LatchGuard`]; dropping it counts down, so a worker that
/// panics or is aborted still releases its slot.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl CompletionLatch {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Guard that counts down when dropped
    pub fn guard(self: &Arc<Self>) -> LatchGuard {
        LatchGuard(Arc::clone(self))
    }

    fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    /// Wait until every guard has been dropped
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent count-down is not missed
            notified.as_mut().enable();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Counts the latch down on drop
#[derive(Debug)]
pub struct LatchGuard(Arc<CompletionLatch>);

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.0.count_down();
    }
}
