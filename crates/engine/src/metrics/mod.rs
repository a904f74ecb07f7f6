//! Operation metrics
//!
//! Workers report every finished operation to a [`MetricsSink`]. Sinks are
//! observability only: nothing they do feeds back into control flow.
//!
//! - [`TimerRegistry`] - In-memory per-tag timers
//! - [`ConsoleReporter`] - Periodic log summary of a registry

mod histogram;
mod reporter;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

pub use histogram::{LatencyHistogram, LatencySummary, Timer};
pub use reporter::{ConsoleReporter, ReporterConfig};

/// Receives operation timings
pub trait MetricsSink: Send + Sync {
    /// An operation with `tag` completed in `elapsed`
    fn record(&self, tag: &str, elapsed: Duration);

    /// An operation with `tag` was abandoned
    fn record_failure(&self, _tag: &str) {}
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _tag: &str, _elapsed: Duration) {}
}

/// Per-tag timers
///
/// Tags are normally registered up front from the workload mix; unknown tags
/// get a timer on first use.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: RwLock<BTreeMap<String, Arc<Timer>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one timer per tag
    pub fn with_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Self {
        let timers = tags
            .into_iter()
            .map(|tag| (tag.to_string(), Arc::new(Timer::new())))
            .collect();
        Self {
            timers: RwLock::new(timers),
        }
    }

    /// Timer for `tag`, created if missing
    pub fn timer(&self, tag: &str) -> Arc<Timer> {
        if let Some(timer) = self.timers.read().get(tag) {
            return Arc::clone(timer);
        }
        let mut timers = self.timers.write();
        Arc::clone(
            timers
                .entry(tag.to_string())
                .or_insert_with(|| Arc::new(Timer::new())),
        )
    }

    /// All timers sorted by tag
    pub fn snapshot(&self) -> Vec<(String, Arc<Timer>)> {
        self.timers
            .read()
            .iter()
            .map(|(tag, timer)| (tag.clone(), Arc::clone(timer)))
            .collect()
    }

    /// Completed operations across every tag
    pub fn total(&self) -> u64 {
        self.timers.read().values().map(|t| t.latency().count()).sum()
    }
}

impl MetricsSink for TimerRegistry {
    fn record(&self, tag: &str, elapsed: Duration) {
        self.timer(tag).record(elapsed);
    }

    fn record_failure(&self, tag: &str) {
        self.timer(tag).record_failure();
    }
}
