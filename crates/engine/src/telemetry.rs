// Logging setup
//
// Console logging through tracing-subscriber with an env-driven filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_FILTER: &str = "dash_engine=info,dash=info";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log filter (e.g., "info", "debug", "dash_engine=debug")
    pub log_filter: Option<String>,
    /// Include the event target in each line
    pub with_target: bool,
    /// Use ANSI colors
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            with_target: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `NO_COLOR`: Disable ANSI colors when set
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            with_target: true,
            ansi: std::env::var_os("NO_COLOR").is_none(),
        }
    }

    /// Set the log filter
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// The effective filter; invalid directives fall back to the default
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber
///
/// Returns false if a subscriber was already installed.
///
/// # Example
///
/// ```ignore
/// use dash_engine::telemetry::{init_tracing, TelemetryConfig};
///
/// init_tracing(&TelemetryConfig::from_env());
/// ```
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .with_filter(config.env_filter());

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok()
}
