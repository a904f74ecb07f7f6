//! Harness configuration
//!
//! A [`DashConfig`] is assembled from, in order:
//! 1. defaults,
//! 2. one named test spec from a YAML conf file (flat `dash.*` keys),
//! 3. environment variables,
//! 4. individual `key=value` overrides.
//!
//! [`DashConfig::validate`] runs before any service is created.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::ReporterConfig;
use crate::reliability::{LimiterError, RateLimiterConfig, RetryConfig};
use crate::service::default_thread_count;
use crate::services::SyntheticConfig;
use crate::workload::{Mix, MixError};

/// Service run when nothing else is named
pub const DEFAULT_SERVICE: &str = "synthetic";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read the conf file
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Conf file is not valid YAML
    #[error("invalid conf file")]
    Yaml(#[from] serde_yaml::Error),

    /// Conf file has no spec with the requested name
    #[error("test spec ({0}) does not exist in the conf file")]
    UnknownTest(String),

    /// A key had a value of the wrong type
    #[error("the {key} property ({value}) is not {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    /// Invalid operation mix
    #[error("invalid workload mix")]
    Mix(#[from] MixError),

    /// Invalid rate limiter settings
    #[error("invalid rate limits")]
    Limiter(#[from] LimiterError),

    /// Any other invalid setting
    #[error("{0}")]
    Invalid(String),
}

/// Worker and pacing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Concurrent workers
    pub threads: usize,

    /// Shared rate limit
    pub rates: RateLimiterConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            threads: default_thread_count(),
            rates: RateLimiterConfig::default(),
        }
    }
}

/// Operation mix; empty means the service supplies its own
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkloadConfig {
    pub mix: Vec<i64>,
    pub tags: Vec<String>,
}

impl WorkloadConfig {
    pub fn is_set(&self) -> bool {
        !self.mix.is_empty() || !self.tags.is_empty()
    }

    /// Configured mix, or the given fallback when none is configured
    pub fn mix_or(&self, weights: &[i64], tags: &[&str]) -> Result<Mix, MixError> {
        if self.is_set() {
            Mix::new(&self.mix, &self.tags)
        } else {
            Mix::new(weights, tags)
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: Option<String>,

    /// Skip the one-time setup check at service creation
    pub skip_init: bool,

    /// Pool size; defaults to the worker count
    pub max_connections: Option<u32>,
}

/// Complete harness configuration
///
/// # Example
///
/// ```
/// use dash_engine::config::DashConfig;
///
/// let config = DashConfig::from_properties([
///     ("runner.class", "synthetic"),
///     ("dash.driver.threads", "8"),
///     ("dash.workload.mix", "70,30"),
///     ("dash.workload.tag", "READ,WRITE"),
/// ])
/// .unwrap();
///
/// assert_eq!(config.driver.threads, 8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashConfig {
    /// Registered name of the service to run
    pub service: String,
    pub driver: DriverConfig,
    pub workload: WorkloadConfig,
    pub retry: RetryConfig,
    pub metrics: ReporterConfig,
    pub database: DatabaseConfig,
    pub synthetic: SyntheticConfig,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            driver: DriverConfig::default(),
            workload: WorkloadConfig::default(),
            retry: RetryConfig::default(),
            metrics: ReporterConfig::default(),
            database: DatabaseConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl DashConfig {
    /// Defaults overlaid with `key=value` properties
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        config.apply_properties(properties)?;
        Ok(config)
    }

    /// Defaults overlaid with test spec `test` from a YAML conf file
    pub fn from_yaml_file(path: impl AsRef<Path>, test: &str) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text, test)
    }

    /// Defaults overlaid with test spec `test` from YAML text
    ///
    /// The document maps test names to flat property maps. Scalar values of
    /// the form `$(NAME)` or `$(NAME:default)` are read from the environment.
    pub fn from_yaml_str(text: &str, test: &str) -> Result<Self, ConfigError> {
        let document: serde_yaml::Value = serde_yaml::from_str(text)?;
        let spec = document
            .get(test)
            .and_then(serde_yaml::Value::as_mapping)
            .ok_or_else(|| ConfigError::UnknownTest(test.to_string()))?;

        let mut properties = Vec::with_capacity(spec.len());
        for (key, value) in spec {
            let Some(key) = scalar_to_string(key) else {
                continue;
            };
            let value = match value {
                serde_yaml::Value::Sequence(items) => {
                    Some(items.iter().filter_map(scalar_to_string).collect::<Vec<_>>().join(","))
                }
                other => scalar_to_string(other),
            };
            let Some(value) = value.and_then(|v| resolve_env(&v, |name| std::env::var(name).ok()))
            else {
                continue;
            };
            properties.push((key, value));
        }

        Self::from_properties(properties)
    }

    /// Apply `key=value` properties on top of the current values
    ///
    /// Arrays are comma separated. Unknown keys are ignored.
    pub fn apply_properties<I, K, V>(&mut self, properties: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in properties {
            self.apply_property(key.as_ref(), value.as_ref().trim())?;
        }
        Ok(())
    }

    fn apply_property(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "runner.class" => self.service = value.to_string(),
            "dash.driver.threads" => self.driver.threads = parse(key, value)?,
            "dash.driver.rates.limit" => self.driver.rates.limit = parse(key, value)?,
            "dash.driver.rates.burst" => self.driver.rates.burst = Some(parse(key, value)?),
            "dash.workload.mix" => self.workload.mix = parse_list(key, value)?,
            "dash.workload.tag" => {
                self.workload.tags = split_list(value).map(str::to_string).collect()
            }
            "dash.retry.max.attempts" => self.retry.max_attempts = parse(key, value)?,
            "dash.retry.min.backoff" => self.retry.min_backoff = parse_millis(key, value)?,
            "dash.retry.max.backoff" => self.retry.max_backoff = parse_millis(key, value)?,
            "dash.retry.slot.time" => self.retry.slot_time = parse_millis(key, value)?,
            "dash.retry.backoff.ceiling" => self.retry.backoff_ceiling = parse(key, value)?,
            "dash.db.url" => self.database.url = Some(value.to_string()),
            "dash.db.skip.init" => self.database.skip_init = parse(key, value)?,
            "dash.db.max.connections" => self.database.max_connections = Some(parse(key, value)?),
            "dash.metrics.service.interval" => {
                self.metrics.interval = Duration::from_secs(parse(key, value)?)
            }
            "dash.metrics.service.reporters" => {
                self.metrics.enabled = split_list(value).any(|r| r == "console")
            }
            "dash.synthetic.latency" => self.synthetic.latency = parse_millis(key, value)?,
            "dash.synthetic.failure.ratio" => {
                self.synthetic.failure_ratio = parse(key, value)?
            }
            _ => debug!(key, "Ignoring unknown property"),
        }
        Ok(())
    }

    /// Apply `DASH_THREADS`, `DASH_RATE_LIMIT`, `DASH_RATE_BURST` and `DATABASE_URL`
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        const OVERRIDES: [(&str, &str); 4] = [
            ("DASH_THREADS", "dash.driver.threads"),
            ("DASH_RATE_LIMIT", "dash.driver.rates.limit"),
            ("DASH_RATE_BURST", "dash.driver.rates.burst"),
            ("DATABASE_URL", "dash.db.url"),
        ];
        for (var, key) in OVERRIDES {
            if let Some(value) = lookup(var) {
                self.apply_property(key, value.trim())?;
            }
        }
        Ok(())
    }

    /// Check every setting that would otherwise fail after workers start
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.is_empty() {
            return Err(ConfigError::Invalid("no service named".to_string()));
        }
        if self.driver.threads == 0 {
            return Err(ConfigError::Invalid(
                "dash.driver.threads must be greater than zero".to_string(),
            ));
        }
        self.driver.rates.validate()?;
        if self.workload.is_set() {
            Mix::new(&self.workload.mix, &self.workload.tags)?;
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dash.retry.max.attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.min_backoff > self.retry.max_backoff {
            return Err(ConfigError::Invalid(
                "dash.retry.min.backoff exceeds dash.retry.max.backoff".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.synthetic.failure_ratio) {
            return Err(ConfigError::Invalid(
                "dash.synthetic.failure.ratio must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Database pool size
    pub fn max_connections(&self) -> u32 {
        self.database
            .max_connections
            .unwrap_or_else(|| u32::try_from(self.driver.threads).unwrap_or(u32::MAX))
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(key, value).map(Duration::from_millis)
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_list<T: std::str::FromStr>(key: &str, value: &str) -> Result<Vec<T>, ConfigError> {
    split_list(value).map(|item| parse(key, item)).collect()
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Expand `$(NAME)` / `$(NAME:default)`; `None` when unset without default
fn resolve_env(value: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    let Some(inner) = value
        .strip_prefix("$(")
        .and_then(|rest| rest.strip_suffix(')'))
    else {
        return Some(value.to_string());
    };
    match inner.split_once(':') {
        Some((name, default)) => Some(lookup(name).unwrap_or_else(|| default.to_string())),
        None => lookup(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = r#"
ping:
  runner.class: ping
  dash.driver.threads: 16
  dash.driver.rates.limit: 500
  dash.workload.mix: [100]
  dash.workload.tag: [PING]
  dash.db.url: postgres://localhost/dash
  dash.log.dir: /tmp
smoke:
  runner.class: synthetic
  dash.driver.threads: 2
  dash.workload.mix: "60, 40"
  dash.workload.tag: "READ, WRITE"
  dash.synthetic.failure.ratio: 0.1
  dash.db.url: $(DASH_TEST_UNSET_URL:none)
"#;

    #[test]
    fn test_defaults() {
        let config = DashConfig::default();
        assert_eq!(config.service, "synthetic");
        assert_eq!(config.driver.rates.limit, 2000);
        assert_eq!(config.driver.rates.burst(), 2000);
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.metrics.interval, Duration::from_secs(5));
        assert!(!config.workload.is_set());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_properties() {
        let config = DashConfig::from_properties([
            ("dash.driver.rates.limit", "100"),
            ("dash.driver.rates.burst", "10"),
            ("dash.retry.max.attempts", "3"),
            ("dash.retry.slot.time", "20"),
            ("dash.metrics.service.reporters", "csv"),
            ("something.else", "ignored"),
        ])
        .unwrap();

        assert_eq!(config.driver.rates.limit, 100);
        assert_eq!(config.driver.rates.burst(), 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.slot_time, Duration::from_millis(20));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_invalid_value() {
        let err = DashConfig::from_properties([("dash.driver.threads", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "dash.driver.threads"));
    }

    #[test]
    fn test_yaml_spec() {
        let config = DashConfig::from_yaml_str(CONF, "ping").unwrap();
        assert_eq!(config.service, "ping");
        assert_eq!(config.driver.threads, 16);
        assert_eq!(config.workload.mix, vec![100]);
        assert_eq!(config.workload.tags, vec!["PING".to_string()]);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/dash"));
        assert_eq!(config.max_connections(), 16);
    }

    #[test]
    fn test_yaml_string_lists_and_env_default() {
        let config = DashConfig::from_yaml_str(CONF, "smoke").unwrap();
        assert_eq!(config.workload.mix, vec![60, 40]);
        assert_eq!(config.workload.tags, vec!["READ".to_string(), "WRITE".to_string()]);
        assert_eq!(config.synthetic.failure_ratio, 0.1);
        assert_eq!(config.database.url.as_deref(), Some("none"));
    }

    #[test]
    fn test_unknown_test() {
        let err = DashConfig::from_yaml_str(CONF, "missing").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTest(name) if name == "missing"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DashConfig::from_yaml_str(CONF, "ping").unwrap();
        config
            .apply_env_from(|name| match name {
                "DASH_THREADS" => Some("3".to_string()),
                "DATABASE_URL" => Some("postgres://db/other".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.driver.threads, 3);
        assert_eq!(config.driver.rates.limit, 500);
        assert_eq!(config.database.url.as_deref(), Some("postgres://db/other"));
    }

    #[test]
    fn test_overrides_apply_after_environment() {
        let mut config = DashConfig::from_yaml_str(CONF, "ping").unwrap();
        config
            .apply_env_from(|name| (name == "DASH_THREADS").then(|| "3".to_string()))
            .unwrap();
        config
            .apply_properties([("dash.driver.threads", "7")])
            .unwrap();

        assert_eq!(config.driver.threads, 7);
    }

    #[test]
    fn test_validate_rejects_bad_mix() {
        let config = DashConfig::from_properties([
            ("dash.workload.mix", "50,40"),
            ("dash.workload.tag", "A,B"),
        ])
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Mix(MixError::InvalidSum(90)))
        ));

        let config = DashConfig::from_properties([
            ("dash.workload.mix", "9223372036854775807,1"),
            ("dash.workload.tag", "A,B"),
        ])
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Mix(MixError::InvalidSum(_)))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let config = DashConfig::from_properties([("dash.driver.rates.limit", "0")]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Limiter(_))));

        let config = DashConfig::from_properties([("dash.driver.threads", "0")]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_resolve_env() {
        let lookup = |name: &str| (name == "SET").then(|| "value".to_string());
        assert_eq!(resolve_env("plain", lookup).as_deref(), Some("plain"));
        assert_eq!(resolve_env("$(SET)", lookup).as_deref(), Some("value"));
        assert_eq!(resolve_env("$(UNSET:fallback)", lookup).as_deref(), Some("fallback"));
        assert_eq!(resolve_env("$(UNSET)", lookup), None);
    }

    #[test]
    fn test_mix_fallback() {
        let workload = WorkloadConfig::default();
        let mix = workload.mix_or(&[100], &["PING"]).unwrap();
        assert_eq!(mix.tags().collect::<Vec<_>>(), vec!["PING"]);
    }
}
