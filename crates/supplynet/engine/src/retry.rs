//! Bounded retry with exponential backoff for transient ledger contention.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{FulfillmentError, FulfillmentResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = (self.config.initial_backoff_ms as f64) * self.config.multiplier.powi(exponent);
        let capped = base.min(self.config.max_backoff_ms as f64).max(0.0) as u64;
        if self.config.jitter && capped > 1 {
            let half = capped / 2;
            Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
        } else {
            Duration::from_millis(capped)
        }
    }

    /// Run `op` until it succeeds, fails deterministically, or contention
    /// persists for every attempt. Persistent contention surfaces as
    /// [`FulfillmentError::CapacityContention`].
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> FulfillmentResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FulfillmentResult<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if matches!(&err, FulfillmentError::Storage(e) if e.is_contention()) => {
                    if attempt >= max_attempts {
                        warn!(operation, attempts = attempt, error = %err, "contention retries exhausted");
                        return Err(FulfillmentError::CapacityContention { attempts: attempt });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "ledger contention, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use supplynet_ledger::LedgerError;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 25,
            multiplier: 2.0,
            jitter,
        })
    }

    #[test]
    fn delay_grows_and_caps() {
        let p = policy(false);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(25));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy(true);
        for _ in 0..50 {
            let d = p.delay_for_attempt(2);
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn contention_is_retried_then_surfaced() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: FulfillmentResult<()> = policy(false)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FulfillmentError::Storage(LedgerError::Contention(
                    "40001".into(),
                )))
            })
            .await;
        assert!(matches!(
            result,
            Err(FulfillmentError::CapacityContention { attempts: 3 })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deterministic_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: FulfillmentResult<()> = policy(false)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FulfillmentError::NotFound("cmt:x".into()))
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::NotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy(false)
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FulfillmentError::Storage(LedgerError::Contention(
                        "40001".into(),
                    )))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }
}
