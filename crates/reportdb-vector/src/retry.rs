//! Bounded retry around embedding provider calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use reportdb_core::config::{BackoffSettings, ProviderSettings};
use reportdb_core::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    None,
    Fixed { delay: Duration },
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Wait after the `failures`-th failed attempt (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(failures.saturating_sub(1));
                initial.saturating_mul(factor).min(*max)
            }
        }
    }
}

impl From<&BackoffSettings> for Backoff {
    fn from(s: &BackoffSettings) -> Self {
        match *s {
            BackoffSettings::None => Backoff::None,
            BackoffSettings::Fixed { delay_ms } => Backoff::Fixed { delay: Duration::from_millis(delay_ms) },
            BackoffSettings::Exponential { initial_ms, max_ms } => Backoff::Exponential {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Budget for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ProviderSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(s: &ProviderSettings) -> Self {
        Self { max_attempts: s.max_attempts.max(1), backoff: Backoff::from(&s.backoff), timeout: s.timeout() }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// A timed-out attempt counts as `ProviderUnavailable`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => Error::ProviderUnavailable(format!("{what} timed out after {} ms", self.timeout.as_millis())),
            };
            if !err.is_transient() || attempt >= max_attempts {
                return Err(err);
            }
            let wait = self.backoff.delay(attempt).max(err.retry_after().unwrap_or_default());
            warn!(what, attempt, max_attempts, wait_ms = wait.as_millis() as u64, error = %err, "retrying provider call");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, backoff: Backoff::None, timeout: Duration::from_secs(5) }
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let b = Backoff::Exponential { initial: Duration::from_millis(100), max: Duration::from_millis(350) };
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(350));
        assert_eq!(b.delay(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = policy(3)
            .run("embed", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::RateLimited { retry_after: None })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(out.expect("third attempt succeeds"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<()> = policy(2)
            .run("embed", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProviderUnavailable("down".into()))
            })
            .await;
        assert!(matches!(out, Err(Error::ProviderUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<()> = policy(5)
            .run("embed", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::DimensionMismatch { expected: 3, actual: 2 })
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_becomes_unavailable() {
        let p = RetryPolicy { max_attempts: 1, backoff: Backoff::None, timeout: Duration::from_millis(50) };
        let out: Result<()> = p
            .run("embed", move || async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(Error::ProviderUnavailable(msg)) if msg.contains("timed out")));
    }
}
