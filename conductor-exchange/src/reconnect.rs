//! Reconnection policy and backoff

use conductor_config::{BackoffKind, ReconnectConfig};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::ExchangeError;

/// Bounded reconnection policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of attempts per operation
    pub max_attempts: u32,

    /// Initial delay between attempts
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff strategy
    pub backoff: BackoffKind,

    /// Whether to add ±20% jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            backoff: config.backoff.clone(),
            jitter: config.jitter,
        }
    }

    /// Fixed delay without jitter
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            backoff: BackoffKind::Fixed,
            jitter: false,
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = match &self.backoff {
            BackoffKind::Fixed => self.initial_delay,
            BackoffKind::Linear => self.initial_delay * attempt,
            BackoffKind::Exponential { base } => {
                if attempt == 0 {
                    return Duration::ZERO;
                }
                let multiplier = base.powi(attempt as i32 - 1);
                Duration::from_nanos((self.initial_delay.as_nanos() as f64 * multiplier) as u64)
            }
        };
        let capped = base.min(self.max_delay);

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.8..1.2);
            Duration::from_nanos((capped.as_nanos() as f64 * factor) as u64)
        } else {
            capped
        }
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up; the last error is returned in the latter cases
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, ExchangeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut attempt = 1;

        loop {
            match f(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("Exchange operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) if !error.is_retryable() => {
                    debug!("Exchange operation failed with non-retryable error: {}", error);
                    return Err(error);
                }
                Err(error) if attempt >= self.max_attempts => {
                    warn!(
                        "Exchange operation failed after {} attempts: {}",
                        attempt, error
                    );
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt, error, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_delays() {
        let mut policy = ReconnectPolicy::fixed(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(100));

        policy.backoff = BackoffKind::Linear;
        policy.max_delay = Duration::from_secs(1);
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));

        policy.backoff = BackoffKind::Exponential { base: 2.0 };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut policy = ReconnectPolicy::fixed(3, Duration::from_millis(100));
        policy.jitter = true;
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(80));
            assert!(delay <= Duration::from_millis(120));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let policy = ReconnectPolicy::fixed(3, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(ExchangeError::NotConnected)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = ReconnectPolicy::fixed(2, Duration::from_millis(10));
        let result: Result<(), _> = policy
            .execute(|_| async { Err(ExchangeError::Connection("refused".to_string())) })
            .await;
        assert!(matches!(result, Err(ExchangeError::Connection(_))));
    }

    #[tokio::test]
    async fn test_non_retryable_errors_are_not_retried() {
        let policy = ReconnectPolicy::fixed(5, Duration::from_millis(10));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ExchangeError::MalformedNote("bad".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
