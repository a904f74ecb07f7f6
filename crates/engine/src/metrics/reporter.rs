//! Periodic console reporting of per-tag timers

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::TimerRegistry;

/// Reporter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReporterConfig {
    /// Whether the reporter runs at all
    pub enabled: bool,

    /// Time between reports
    #[serde(with = "duration_secs")]
    pub interval: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
        }
    }
}

/// A running reporting loop and the token that ends it
struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Logs a summary line per tag at a fixed interval, and once more on stop
///
/// Can be started again after a stop; each run gets its own cancellation.
pub struct ConsoleReporter {
    registry: Arc<TimerRegistry>,
    config: ReporterConfig,
    running: Mutex<Option<Running>>,
}

impl ConsoleReporter {
    pub fn new(registry: Arc<TimerRegistry>, config: ReporterConfig) -> Self {
        Self {
            registry,
            config,
            running: Mutex::new(None),
        }
    }

    /// Start the reporting loop; no-op when disabled or already running
    pub fn start(&self) {
        if !self.config.enabled || self.config.interval.is_zero() {
            return;
        }
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let interval = self.config.interval;
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => report(&registry),
                    _ = stopped.cancelled() => break,
                }
            }
        });
        *running = Some(Running { cancel, handle });
    }

    /// Whether a reporting loop is active
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Stop the loop and emit a final report; no-op when not running
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            let _ = handle.await;
            report(&self.registry);
        }
    }
}

/// Log one line per timer
pub fn report(registry: &TimerRegistry) {
    for (tag, timer) in registry.snapshot() {
        let summary = timer.latency().summary();
        info!(
            tag = %tag,
            count = summary.count,
            failures = timer.failures(),
            rate = format!("{:.1}/s", timer.throughput()),
            mean_ms = format!("{:.2}", summary.mean.as_secs_f64() * 1000.0),
            min_ms = format!("{:.2}", summary.min.as_secs_f64() * 1000.0),
            max_ms = format!("{:.2}", summary.max.as_secs_f64() * 1000.0),
            p50_ms = format!("{:.2}", summary.p50.as_secs_f64() * 1000.0),
            p95_ms = format!("{:.2}", summary.p95.as_secs_f64() * 1000.0),
            p99_ms = format!("{:.2}", summary.p99.as_secs_f64() * 1000.0),
            "Operation timer"
        );
    }
}

/// Serde support for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;

    #[tokio::test(start_paused = true)]
    async fn test_start_stop() {
        let registry = Arc::new(TimerRegistry::with_tags(["PING"]));
        registry.record("PING", Duration::from_millis(1));

        let reporter = ConsoleReporter::new(
            Arc::clone(&registry),
            ReporterConfig {
                enabled: true,
                interval: Duration::from_secs(1),
            },
        );
        reporter.start();
        reporter.start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        reporter.stop().await;

        assert!(!reporter.is_running());
    }

    #[tokio::test]
    async fn test_disabled_reporter_never_spawns() {
        let reporter = ConsoleReporter::new(
            Arc::new(TimerRegistry::new()),
            ReporterConfig {
                enabled: false,
                ..Default::default()
            },
        );
        reporter.start();
        assert!(!reporter.is_running());
        reporter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_leaves_reporter_usable() {
        let reporter = ConsoleReporter::new(
            Arc::new(TimerRegistry::with_tags(["PING"])),
            ReporterConfig {
                enabled: true,
                interval: Duration::from_secs(1),
            },
        );
        reporter.stop().await;

        reporter.start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(reporter.is_running());
        reporter.stop().await;
        assert!(!reporter.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let reporter = ConsoleReporter::new(
            Arc::new(TimerRegistry::with_tags(["PING"])),
            ReporterConfig {
                enabled: true,
                interval: Duration::from_secs(1),
            },
        );
        reporter.start();
        reporter.stop().await;

        reporter.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(reporter.is_running());
        reporter.stop().await;
    }

    #[test]
    fn test_config_serialization() {
        let config = ReporterConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"enabled":true,"interval":5}"#);
    }
}
