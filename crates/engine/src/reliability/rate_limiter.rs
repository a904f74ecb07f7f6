//! Token-bucket rate limiting
//!
//! One bucket is shared by every worker of a pool, so the aggregate operation
//! rate stays at or below the configured sustained rate no matter how many
//! workers call [`Limiter::consume`].

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Slack for floating point refill arithmetic
const EPSILON: f64 = 1e-9;

/// Shortest wait between refill checks
const MIN_WAIT: Duration = Duration::from_micros(100);

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimiterError {
    /// The request can never be satisfied
    #[error("requested {requested} tokens but burst capacity is {capacity}")]
    ExceedsCapacity { requested: u32, capacity: u64 },

    /// Invalid configuration
    #[error("invalid rate limiter configuration: {0}")]
    InvalidConfig(String),
}

/// Paces callers to a sustained rate
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Wait until `tokens` are available, then take them
    async fn consume(&self, tokens: u32) -> Result<(), LimiterError>;
}

/// Rate limiter configuration
///
/// # Example
///
/// ```
/// use dash_engine::reliability::RateLimiterConfig;
///
/// let config = RateLimiterConfig::new(500).with_burst(50);
/// assert_eq!(config.burst(), 50);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimiterConfig {
    /// Sustained rate in tokens per second
    pub limit: u64,

    /// Bucket capacity; defaults to `limit`
    #[serde(default)]
    pub burst: Option<u64>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit: 2000,
            burst: None,
        }
    }
}

impl RateLimiterConfig {
    pub fn new(limit: u64) -> Self {
        Self { limit, burst: None }
    }

    /// Set the burst capacity
    pub fn with_burst(mut self, burst: u64) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Effective bucket capacity
    pub fn burst(&self) -> u64 {
        self.burst.unwrap_or(self.limit)
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.limit == 0 {
            return Err(LimiterError::InvalidConfig(
                "rate limit must be greater than zero".to_string(),
            ));
        }
        if self.burst() == 0 {
            return Err(LimiterError::InvalidConfig(
                "burst capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at the sustained rate
///
/// Starts full. Waiters sleep for exactly the time needed to cover their
/// deficit and re-check; there is no FIFO ordering between waiters.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: &RateLimiterConfig) -> Result<Self, LimiterError> {
        config.validate()?;
        let capacity = config.burst();
        Ok(Self {
            rate: config.limit as f64,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Sustained rate in tokens per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        (state.tokens + EPSILON).floor() as u64
    }

    /// Take `tokens` if they are available right now
    pub fn try_consume(&self, tokens: u32) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        Self::take(&mut state, tokens)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity as f64);
        state.last_refill = now;
    }

    fn take(state: &mut BucketState, tokens: u32) -> bool {
        let wanted = f64::from(tokens);
        if state.tokens + EPSILON >= wanted {
            state.tokens = (state.tokens - wanted).max(0.0);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Limiter for TokenBucket {
    async fn consume(&self, tokens: u32) -> Result<(), LimiterError> {
        if u64::from(tokens) > self.capacity {
            return Err(LimiterError::ExceedsCapacity {
                requested: tokens,
                capacity: self.capacity,
            });
        }

        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if Self::take(&mut state, tokens) {
                    return Ok(());
                }
                let deficit = f64::from(tokens) - state.tokens;
                Duration::from_secs_f64(deficit / self.rate)
            };
            tokio::time::sleep(wait.max(MIN_WAIT)).await;
        }
    }
}

/// Limiter that never waits
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl Limiter for Unlimited {
    async fn consume(&self, _tokens: u32) -> Result<(), LimiterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_config() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.limit, 2000);
        assert_eq!(config.burst(), 2000);
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimiterConfig::new(0).validate().is_err());
        assert!(RateLimiterConfig::new(10).with_burst(0).validate().is_err());
        assert!(TokenBucket::new(&RateLimiterConfig::new(0)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_immediate() {
        let bucket = TokenBucket::new(&RateLimiterConfig::new(100)).unwrap();
        let started = Instant::now();

        for _ in 0..100 {
            bucket.consume(1).await.unwrap();
        }

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(!bucket.try_consume(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_capacity() {
        let bucket = TokenBucket::new(&RateLimiterConfig::new(100).with_burst(10)).unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(bucket.available(), 10);
        let mut granted = 0;
        while bucket.try_consume(1) {
            granted += 1;
        }
        assert_eq!(granted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_rate() {
        // 100 burst tokens up front, the remaining 900 at 100/s
        let bucket = TokenBucket::new(&RateLimiterConfig::new(100).with_burst(100)).unwrap();
        let started = Instant::now();

        for _ in 0..1000 {
            bucket.consume(1).await.unwrap();
        }

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(8_900), "took {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(10_000), "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_between_tasks() {
        let bucket = Arc::new(TokenBucket::new(&RateLimiterConfig::new(50).with_burst(5)).unwrap());
        let dispensed = Arc::new(AtomicU64::new(0));
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bucket = Arc::clone(&bucket);
            let dispensed = Arc::clone(&dispensed);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    bucket.consume(1).await.unwrap();
                    dispensed.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 200 tokens: 5 up front, 195 at 50/s
        assert_eq!(dispensed.load(Ordering::Relaxed), 200);
        assert!(started.elapsed() >= Duration::from_millis(3_800));
    }

    #[tokio::test]
    async fn test_rejects_oversized_request() {
        let bucket = TokenBucket::new(&RateLimiterConfig::new(10).with_burst(5)).unwrap();
        assert_eq!(
            bucket.consume(6).await,
            Err(LimiterError::ExceedsCapacity {
                requested: 6,
                capacity: 5
            })
        );
    }

    #[tokio::test]
    async fn test_unlimited() {
        let limiter = Unlimited;
        for _ in 0..10_000 {
            limiter.consume(u32::MAX).await.unwrap();
        }
    }
}
