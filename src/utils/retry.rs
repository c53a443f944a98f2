//! Retry logic with exponential backoff for post-fix polling
//!
//! After a configuration rewrite or a service start the manager interface
//! takes a moment to come back. Instead of fixed sleeps, callers poll with
//! a bounded [`RetryConfig`] so the timing assumptions are visible and
//! tunable.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial attempt)
    pub max_retries: u32,
    /// Initial delay before the first retry
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    /// Maximum delay between retries
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,
    /// Apply ±20% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        use crate::constants::{POST_FIX_INITIAL_DELAY_MS, POST_FIX_MAX_DELAY_MS, POST_FIX_RETRIES};
        Self {
            max_retries: POST_FIX_RETRIES,
            initial_delay: Duration::from_millis(POST_FIX_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(POST_FIX_MAX_DELAY_MS),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a configuration with no retries (fail fast)
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Fixed, jitter-free delays; used by tests and `--no-reload` runs
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay that follows `delay` under this policy
    fn next_delay(&self, delay: Duration) -> Duration {
        let next_delay_ms = (delay.as_millis() as f64 * self.backoff_multiplier) as u64;
        let base_delay = Duration::from_millis(next_delay_ms).min(self.max_delay);
        if !self.jitter {
            return base_delay;
        }

        let mut rng = rand::thread_rng();
        let jitter_factor = rng.gen_range(0.8..=1.2);
        Duration::from_millis((base_delay.as_millis() as f64 * jitter_factor) as u64)
    }
}

/// Retry an async operation with exponential backoff
///
/// # Arguments
///
/// * `config` - Retry configuration
/// * `operation` - Async closure that returns Result<T, E>
/// * `is_retryable` - Function to determine if an error is worth retrying
///
/// # Example
///
/// ```ignore
/// use amidoctor::utils::retry::{retry_with_backoff, RetryConfig};
///
/// let result = retry_with_backoff(
///     &RetryConfig::default(),
///     || async { probe.check("127.0.0.1", 5038).await },
///     |err| is_transient_error(&err.to_string()),
/// ).await;
/// ```
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;

                if attempt > config.max_retries || !is_retryable(&err) {
                    return Err(err);
                }

                tracing::debug!(
                    attempt,
                    max_attempts = config.max_retries + 1,
                    error = %err,
                    ?delay,
                    "retrying after failure"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

/// Determines if a failure message describes a condition worth waiting out
///
/// Retryable: the interface is still coming up (refused, not listening,
/// timed out). Non-retryable: the interface answered and rejected us.
pub fn is_transient_error(error_msg: &str) -> bool {
    let lowercase = error_msg.to_lowercase();

    let non_retryable_patterns = [
        "authentication failed",
        "permission denied",
        "access denied",
        "not found",
    ];

    let retryable_patterns = [
        "timeout",
        "timed out",
        "connection refused",
        "not listening",
        "unreachable",
        "connection reset",
        "broken pipe",
        "temporarily unavailable",
    ];

    if non_retryable_patterns.iter().any(|p| lowercase.contains(p)) {
        return false;
    }

    retryable_patterns.iter().any(|p| lowercase.contains(p))
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
