//! Bounded retry with backoff.
//!
//! Used in two places with different policies: the API client retries a
//! single GET (3 attempts, linear 5 s steps) and the orchestration graph
//! retries a whole task (3 attempts, fixed 5 min delay).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed,
    /// `base_delay * attempt`, attempt counted from 1.
    Linear,
    /// `base_delay * 2^(attempt - 1)`.
    Exponential,
}

/// Randomisation applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "fraction")]
pub enum Jitter {
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay * (1 - f), delay * (1 + f)]`.
    Proportional(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    pub jitter: Jitter,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay,
            backoff,
            jitter: Jitter::None,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Backoff::Fixed)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before the next attempt after `attempt` (1-based) failed,
    /// without jitter.
    pub fn base_delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        }
    }

    /// Delay before the next attempt after `attempt` failed, jitter applied.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_after(attempt);
        match self.jitter {
            Jitter::None => delay,
            Jitter::Full => {
                let secs = delay.as_secs_f64();
                if secs <= 0.0 {
                    return delay;
                }
                Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=secs))
            }
            Jitter::Proportional(fraction) => {
                let fraction = fraction.clamp(0.0, 1.0);
                let secs = delay.as_secs_f64();
                if secs <= 0.0 || fraction == 0.0 {
                    return delay;
                }
                let low = secs * (1.0 - fraction);
                let high = secs * (1.0 + fraction);
                Duration::from_secs_f64(rand::thread_rng().gen_range(low..=high))
            }
        }
    }
}

/// Final error of a retried operation.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Runs `op` until it succeeds, `is_retryable` rejects its error, or the
/// policy's attempts are used up. No sleep follows the last attempt.
///
/// `label` only appears in log lines.
pub async fn retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: R,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= attempts || !is_retryable(&err) {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    target: "energy_forecast::retry",
                    label,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
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
    fn test_linear_backoff_grows_by_base() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5), Backoff::Linear);
        assert_eq!(policy.base_delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.base_delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.base_delay_after(3), Duration::from_secs(15));
    }

    #[test]
    fn test_fixed_and_exponential_backoff() {
        let fixed = RetryPolicy::new(3, Duration::from_secs(300), Backoff::Fixed);
        assert_eq!(fixed.base_delay_after(1), Duration::from_secs(300));
        assert_eq!(fixed.base_delay_after(2), Duration::from_secs(300));

        let exp = RetryPolicy::new(4, Duration::from_millis(100), Backoff::Exponential);
        assert_eq!(exp.base_delay_after(1), Duration::from_millis(100));
        assert_eq!(exp.base_delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10), Backoff::Fixed)
            .with_jitter(Jitter::Proportional(0.2));
        for _ in 0..50 {
            let d = policy.delay_after(1).as_secs_f64();
            assert!((8.0..=12.0).contains(&d), "delay {d} out of range");
        }

        let full = policy.with_jitter(Jitter::Full);
        for _ in 0..50 {
            assert!(full.delay_after(1) <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Backoff::Fixed);
        assert_eq!(policy.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Backoff::Linear);
        let counter = calls.clone();
        let result: Result<u32, RetryError<String>> = retry(&policy, "test", |_| true, |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(format!("fail {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Backoff::Fixed);
        let result: Result<(), RetryError<String>> =
            retry(&policy, "test", |_| true, |_| async { Err("boom".to_string()) }).await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last_error, "boom");
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Backoff::Fixed);
        let counter = calls.clone();
        let result: Result<(), RetryError<String>> = retry(&policy, "test", |_| false, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
