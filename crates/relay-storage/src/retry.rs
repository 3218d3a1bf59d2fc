//! Retry policy with exponential backoff and bounded jitter.
//!
//! - Exponential backoff: `base * 2^attempt + jitter`, capped at `max_delay`
//! - Respects Retry-After on 429 without going past `max_delay`
//! - Sleeps are cut short by cancellation

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use crate::error::{StorageError, StorageResult};
use crate::metrics::record_retry;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 64_000;
const DEFAULT_JITTER_MS: u64 = 100;

// =============================================================================
// Configuration
// =============================================================================

/// Backoff parameters, fixed for the lifetime of a client.
///
/// `max_attempts` counts every call including the first one. Jitter never
/// exceeds the base delay, so successive delays never shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            Duration::from_millis(DEFAULT_JITTER_MS),
        )
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter_max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_max: jitter_max.min(base_delay),
        }
    }

    /// Create policy from environment variables.
    pub fn from_env() -> Self {
        let max_attempts: u32 = std::env::var("RELAY_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        let base_delay_ms: u64 = std::env::var("RELAY_RETRY_BASE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BASE_DELAY_MS);

        let max_delay_ms: u64 = std::env::var("RELAY_RETRY_MAX_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_DELAY_MS);

        let jitter_ms: u64 = std::env::var("RELAY_RETRY_JITTER_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_JITTER_MS);

        Self::new(
            max_attempts,
            Duration::from_millis(base_delay_ms),
            Duration::from_millis(max_delay_ms),
            Duration::from_millis(jitter_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter_max(&self) -> Duration {
        self.jitter_max
    }

    /// Delay after the failed attempt `attempt` (0-based) with a given jitter.
    pub fn delay_for_attempt(&self, attempt: u32, jitter: Duration) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        exp.saturating_add(jitter.min(self.jitter_max)).min(self.max_delay)
    }

    /// Delay after the failed attempt `attempt` with random jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        self.delay_for_attempt(attempt, jitter)
    }

    /// Delay before retrying `err`, honouring a server-provided wait.
    pub fn delay_after_error(&self, attempt: u32, err: &StorageError) -> Duration {
        let backoff = self.backoff(attempt);
        match err.retry_after_ms() {
            Some(after) => Duration::from_millis(after).max(backoff).min(self.max_delay),
            None => backoff,
        }
    }

    /// Whether another attempt is allowed after `attempt` failed with `err`.
    pub fn should_retry(&self, attempt: u32, err: &StorageError) -> bool {
        err.is_retryable() && attempt + 1 < self.max_attempts
    }
}

// =============================================================================
// Retry Loop
// =============================================================================

/// Execute an async operation with retry.
///
/// The closure receives the 0-based attempt index. Retries on network
/// failures, timeouts, 429 and 5xx. Everything else, including an open
/// circuit and cancellation, is returned immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> StorageResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let span = info_span!("storage_attempt", operation = %operation, attempt = attempt + 1);

        match op(attempt).instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.delay_after_error(attempt, &e);

                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Storage operation failed, retrying: {}",
                    e
                );

                record_retry(operation);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }

                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(10),
            Duration::from_millis(100),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay(), Duration::from_millis(1000));
        assert_eq!(policy.max_delay(), Duration::from_millis(64_000));
        assert_eq!(policy.jitter_max(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_clamped_to_base() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50), Duration::from_secs(1));
        assert_eq!(policy.jitter_max(), Duration::from_millis(10));
    }

    #[test]
    fn test_delays_monotonic_and_bounded() {
        let policy = RetryPolicy::default();
        // worst case: max jitter then zero jitter on the next attempt
        for attempt in 0..40 {
            let hi = policy.delay_for_attempt(attempt, policy.jitter_max());
            let next_lo = policy.delay_for_attempt(attempt + 1, Duration::ZERO);
            assert!(next_lo >= hi, "attempt {}: {:?} < {:?}", attempt, next_lo, hi);
            assert!(hi <= policy.max_delay());
        }

        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = policy.backoff(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.max_delay());
            previous = delay;
        }
    }

    #[test]
    fn test_delay_with_retry_after() {
        let policy = RetryPolicy::default();
        let err = StorageError::RateLimited { retry_after_ms: Some(5000) };
        assert_eq!(policy.delay_after_error(0, &err), Duration::from_millis(5000));

        let huge = StorageError::RateLimited { retry_after_ms: Some(10_000_000) };
        assert_eq!(policy.delay_after_error(0, &huge), policy.max_delay());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = with_retry(&fast_policy(3), "test", &cancel, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::Server(503, "busy".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: StorageResult<()> = with_retry(&fast_policy(3), "test", &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::Transient("reset".into())) }
        })
        .await;

        assert!(matches!(result, Err(StorageError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_skips_permanent_errors() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: StorageResult<()> = with_retry(&fast_policy(5), "test", &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::PermanentClient(400, "bad".into())) }
        })
        .await;

        assert!(matches!(result, Err(StorageError::PermanentClient(400, _))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_cancelled_during_backoff() {
        let policy = RetryPolicy::new(5, Duration::from_secs(10), Duration::from_secs(60), Duration::ZERO);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result: StorageResult<()> = with_retry(&policy, "test", &cancel, |_| async {
            Err(StorageError::Server(500, "down".into()))
        })
        .await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
    }
}
