//! Bounded retries with exponential backoff.

use super::error::GatewayError;
use crate::config::GatewayConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cooperative cancellation shared between a caller and in-flight calls.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// How many times to attempt a call and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    deadline: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; zero is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration, deadline: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            deadline,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.max_retries(),
            config.base_delay(),
            config.overall_deadline(),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Wait after the failed attempt `attempt` (zero-based): base * 2^attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Makes at most `max_attempts` calls. Only retryable errors are
    /// repeated. The whole sequence, backoff sleeps included, is bounded by
    /// the deadline and aborts promptly when `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancelToken,
        call: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.run_when(operation, cancel, GatewayError::is_retryable, call)
            .await
    }

    /// Like [`run`](Self::run), but only errors matching `retryable` are
    /// repeated.
    pub async fn run_when<T, F, Fut, R>(
        &self,
        operation: &str,
        cancel: &CancelToken,
        retryable: R,
        mut call: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
        R: Fn(&GatewayError) -> bool,
    {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let max_attempts = self.max_attempts;
        let attempts = async {
            let mut last_error = None;
            for attempt in 0..max_attempts {
                match call().await {
                    Ok(value) => {
                        if attempt > 0 {
                            debug!(operation, attempt = attempt + 1, "Succeeded after retry");
                        }
                        return Ok(value);
                    }
                    Err(e) if retryable(&e) => {
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            max_attempts,
                            error = %e,
                            "Broker call failed"
                        );
                        last_error = Some(e);
                        if attempt + 1 < max_attempts {
                            tokio::time::sleep(self.backoff(attempt)).await;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            Err(GatewayError::MaxRetriesExceeded {
                attempts: max_attempts,
                last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            outcome = tokio::time::timeout(self.deadline, attempts) => {
                outcome.unwrap_or(Err(GatewayError::DeadlineExceeded(self.deadline)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_secs(5))
    }

    fn unavailable() -> GatewayError {
        GatewayError::Transient {
            status: 503,
            message: "Service Unavailable".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(90));
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        // Large exponents saturate instead of overflowing.
        assert!(policy.backoff(40) >= policy.backoff(31));
    }

    #[tokio::test]
    async fn test_persistent_503_makes_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run("quote", &CancelToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(unavailable()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(GatewayError::MaxRetriesExceeded { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run("order", &CancelToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GatewayError::OrderRejected {
                        reason: "Invalid option symbol".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(GatewayError::OrderRejected { .. })));
    }

    #[tokio::test]
    async fn test_run_when_narrows_what_is_repeated() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run_when(
                "submit_order",
                &CancelToken::new(),
                GatewayError::is_safe_to_resubmit,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(GatewayError::Timeout("read timed out".to_string())) }
                },
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("quote", &CancelToken::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(unavailable())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_sequence() {
        let policy = RetryPolicy::new(10, Duration::from_secs(5), Duration::from_millis(50));
        let result: Result<(), _> = policy
            .run("chain", &CancelToken::new(), || async { Err(unavailable()) })
            .await;

        assert_eq!(
            result.unwrap_err(),
            GatewayError::DeadlineExceeded(Duration::from_millis(50))
        );
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancelToken::new();
        let policy = RetryPolicy::new(3, Duration::from_secs(30), Duration::from_secs(120));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = policy
            .run("balances", &cancel, || async { Err(unavailable()) })
            .await;

        assert_eq!(result.unwrap_err(), GatewayError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(3)
            .run("positions", &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), GatewayError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
