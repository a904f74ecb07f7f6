//! Reliability patterns for workload execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Runs an operation against fresh resources with randomized exponential backoff
//! - [`FailureClassifier`] - Maps backend failures onto retry decisions
//! - [`TokenBucket`] - Shared rate limiter pacing every worker of a pool

mod classify;
mod rate_limiter;
mod retry;

pub use classify::{FailureClass, FailureClassifier, SqlStateClassifier};
pub use rate_limiter::{Limiter, LimiterError, RateLimiterConfig, TokenBucket, Unlimited};
pub use retry::{RetryConfig, RetryError, RetryPolicy};

pub(crate) use retry::duration_millis;
