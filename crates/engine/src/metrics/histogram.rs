//! Latency timers
//!
//! Collects latency distributions and throughput for one operation tag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Samples kept for percentile calculation
const RESERVOIR_SIZE: usize = 100_000;

/// Latency histogram over a sliding window of recent samples
///
/// Count, mean, min and max cover every sample; percentiles cover the most
/// recent [`RESERVOIR_SIZE`] samples.
#[derive(Debug)]
pub struct LatencyHistogram {
    /// Ring of recent samples
    samples: Mutex<Reservoir>,
    /// Sum of all samples (for mean calculation)
    sum_micros: AtomicU64,
    /// Count of samples
    count: AtomicU64,
    /// Min latency observed
    min_micros: AtomicU64,
    /// Max latency observed
    max_micros: AtomicU64,
}

#[derive(Debug)]
struct Reservoir {
    values: Vec<Duration>,
    next: usize,
}

impl Reservoir {
    fn push(&mut self, value: Duration) {
        if self.values.len() < RESERVOIR_SIZE {
            self.values.push(value);
        } else {
            self.values[self.next] = value;
            self.next = (self.next + 1) % RESERVOIR_SIZE;
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Reservoir {
                values: Vec::with_capacity(1024),
                next: 0,
            }),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
        }
    }

    /// Record a latency sample
    pub fn record(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;

        self.samples.lock().push(duration);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Get the count of samples
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the mean latency
    pub fn mean(&self) -> Duration {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        let sum = self.sum_micros.load(Ordering::Relaxed);
        Duration::from_micros(sum / count)
    }

    /// Get the minimum latency
    pub fn min(&self) -> Duration {
        let min = self.min_micros.load(Ordering::Relaxed);
        if min == u64::MAX {
            Duration::ZERO
        } else {
            Duration::from_micros(min)
        }
    }

    /// Get the maximum latency
    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_micros.load(Ordering::Relaxed))
    }

    /// Calculate percentile (0.0 to 1.0)
    pub fn percentile(&self, p: f64) -> Duration {
        let mut sorted = self.samples.lock().values.clone();
        Self::percentile_of(&mut sorted, p)
    }

    fn percentile_of(sorted: &mut [Duration], p: f64) -> Duration {
        if sorted.is_empty() {
            return Duration::ZERO;
        }
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get summary statistics
    pub fn summary(&self) -> LatencySummary {
        let mut sorted = self.samples.lock().values.clone();
        LatencySummary {
            count: self.count(),
            mean: self.mean(),
            min: self.min(),
            max: self.max(),
            p50: Self::percentile_of(&mut sorted, 0.50),
            p95: Self::percentile_of(&mut sorted, 0.95),
            p99: Self::percentile_of(&mut sorted, 0.99),
        }
    }
}

/// Summary statistics for latency
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Latency and outcome tracking for one operation tag
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    latency: LatencyHistogram,
    failures: AtomicU64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            latency: LatencyHistogram::new(),
            failures: AtomicU64::new(0),
        }
    }

    /// Record one completed operation
    pub fn record(&self, elapsed: Duration) {
        self.latency.record(elapsed);
    }

    /// Record one abandoned operation
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Completed operations per second since the timer was created
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.latency.count() as f64 / elapsed
    }
}
