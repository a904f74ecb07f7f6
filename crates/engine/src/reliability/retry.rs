//! Retry policy implementation

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::classify::{FailureClass, FailureClassifier, SqlStateClassifier};
use crate::resource::{Operation, OperationError, ResourceHandle, ResourceProvider};

/// Retry parameters
///
/// Delays follow randomized binary exponential backoff: the first attempt runs
/// immediately, attempt `k` waits
/// `min(min_backoff + random(0, 2^min(k, backoff_ceiling)) * slot_time, max_backoff)`.
///
/// # Example
///
/// ```
/// use dash_engine::reliability::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::exponential()
///     .with_max_attempts(5)
///     .with_slot_time(Duration::from_millis(20))
///     .with_max_backoff(Duration::from_secs(1));
///
/// assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
/// assert!(config.delay_for_attempt(3) <= Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Floor added to every non-zero delay
    #[serde(with = "duration_millis")]
    pub min_backoff: Duration,

    /// Upper bound on any delay
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,

    /// Length of one backoff slot
    #[serde(with = "duration_millis")]
    pub slot_time: Duration,

    /// Largest exponent used when drawing the slot count
    pub backoff_ceiling: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryConfig {
    /// Randomized exponential backoff with sensible defaults
    ///
    /// - 10 max attempts
    /// - 5ms min backoff
    /// - 2 second max backoff
    /// - 10ms slot time
    /// - exponent ceiling of 10
    pub fn exponential() -> Self {
        Self {
            max_attempts: 10,
            min_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_secs(2),
            slot_time: Duration::from_millis(10),
            backoff_ceiling: 10,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            slot_time: Duration::ZERO,
            backoff_ceiling: 0,
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_backoff: interval,
            max_backoff: interval,
            slot_time: Duration::ZERO,
            backoff_ceiling: 0,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the minimum backoff
    pub fn with_min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    /// Set the maximum backoff
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Set the slot time
    pub fn with_slot_time(mut self, slot: Duration) -> Self {
        self.slot_time = slot;
        self
    }

    /// Set the exponent ceiling
    pub fn with_backoff_ceiling(mut self, ceiling: u32) -> Self {
        self.backoff_ceiling = ceiling.min(31);
        self
    }

    /// Calculate delay before a given attempt (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.min(self.backoff_ceiling).min(31);
        let slots = rand::thread_rng().gen_range(0..(1u32 << exponent));
        let delay = self.min_backoff + self.slot_time.saturating_mul(slots);
        delay.min(self.max_backoff)
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Why [`RetryPolicy::action`] gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed transiently
    #[error("gave up after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        last: OperationError,
    },

    /// A failure retrying cannot fix
    #[error("non-transient failure on attempt {attempt}")]
    NonTransient {
        attempt: u32,
        #[source]
        error: OperationError,
    },

    /// Cancelled while waiting or running
    #[error("operation cancelled")]
    Cancelled,
}

impl RetryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The underlying operation error, if any
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::NonTransient { error, .. } => Some(error),
            Self::Cancelled => None,
        }
    }

    /// Whether the failure must stop the whole pool
    pub fn is_fatal(&self) -> bool {
        self.operation_error().is_some_and(OperationError::is_fatal)
    }
}

/// Runs operations against fresh resources, retrying transient failures
///
/// Holds no per-invocation state; one instance is shared by every worker.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    classifier: Arc<dyn FailureClassifier>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default(), SqlStateClassifier)
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, classifier: impl FailureClassifier + 'static) -> Self {
        Self {
            config,
            classifier: Arc::new(classifier),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn classify(&self, error: &OperationError) -> FailureClass {
        self.classifier.classify(error)
    }

    /// Run `operation` until it succeeds, fails for good, or is cancelled
    ///
    /// Each attempt gets its own resource, which is committed on success and
    /// rolled back on failure (skipped for connection failures), then closed.
    pub async fn action<P, O>(
        &self,
        provider: &P,
        operation: &mut O,
        cancel: &CancellationToken,
    ) -> Result<O::Output, RetryError>
    where
        P: ResourceProvider + ?Sized,
        O: Operation<P::Resource> + ?Sized,
    {
        let mut attempt = 0u32;
        loop {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                trace!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            attempt += 1;
            let (error, class) = match self.attempt(provider, operation, cancel).await {
                Ok(output) => return Ok(output),
                Err(failure) => failure,
            };

            match class {
                FailureClass::Cancelled => return Err(RetryError::Cancelled),
                FailureClass::NonTransient => {
                    return Err(RetryError::NonTransient { attempt, error })
                }
                _ if !self.config.has_attempts_remaining(attempt) => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    })
                }
                class => {
                    debug!(attempt, %class, error = %error, "Transient failure, retrying");
                }
            }
        }
    }

    async fn attempt<P, O>(
        &self,
        provider: &P,
        operation: &mut O,
        cancel: &CancellationToken,
    ) -> Result<O::Output, (OperationError, FailureClass)>
    where
        P: ResourceProvider + ?Sized,
        O: Operation<P::Resource> + ?Sized,
    {
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OperationError::Cancelled),
            acquired = provider.acquire() => acquired,
        };
        let mut resource = match acquired {
            Ok(resource) => resource,
            Err(error) => {
                let class = self.classifier.classify(&error);
                return Err((error, class));
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OperationError::Cancelled),
            result = operation.run(&mut resource) => result,
        };
        let outcome = match outcome {
            Ok(output) => resource.commit().await.map(|()| output),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(output) => {
                resource.close().await;
                Ok(output)
            }
            Err(error) => {
                let class = self.classifier.classify(&error);
                if !class.is_connection() {
                    if let Err(rollback_error) = resource.rollback().await {
                        debug!(error = %rollback_error, "Rollback failed");
                    }
                }
                resource.close().await;
                Err((error, class))
            }
        }
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
