// ============================================
// RXCACHE - Provider Retry with Exponential Backoff
// ============================================

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add ±25% jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let mut delay_ms = base_delay.min(self.max_delay.as_millis() as f64);

        if self.jitter {
            let jitter_range = delay_ms * 0.25;
            delay_ms = (delay_ms + (rand_simple() * 2.0 - 1.0) * jitter_range).max(0.0);
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Cheap jitter source (0.0 to 1.0)
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn retry_decision(&self) -> RetryDecision;
}

impl Retryable for ProviderError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            ProviderError::Status { status, .. } => match *status {
                408 | 409 | 425 | 429 => RetryDecision::Retry,
                500..=599 => RetryDecision::Retry,
                _ => RetryDecision::NoRetry,
            },
            ProviderError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                RetryDecision::Retry
            }
            ProviderError::Http(_) => RetryDecision::NoRetry,
            ProviderError::MissingApiKey(_) | ProviderError::Malformed(_) => RetryDecision::NoRetry,
        }
    }
}

/// Run `operation` until it succeeds, hits a permanent error, or runs out of
/// attempts.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < config.max_retries => match e.retry_decision() {
                RetryDecision::Retry => {
                    let delay = config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::NoRetry => {
                    tracing::error!("Permanent error, not retrying: {}", e);
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}
