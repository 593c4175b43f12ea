//! Retry with exponential backoff and full jitter.
//!
//! Full jitter (uniform in [0, delay]) rather than equal jitter: it spreads
//! synchronized retry storms further apart under load. The retry budget is a
//! shared atomic counter threaded through a whole incoming request so a chain
//! of downstream calls cannot multiply retries against a struggling service.

use crate::error::CallError;
use observability::metrics::RETRY_ATTEMPTS_TOTAL;
use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Status codes that are safe to retry (server-side transient errors only).
pub fn default_retryable_status() -> HashSet<u16> {
    HashSet::from([429, 500, 502, 503, 504])
}

/// Shared, mutable retry allowance for one incoming request.
///
/// Cloned handles point at the same counter; every scheduled retry anywhere
/// in the call tree spends from it.
#[derive(Clone, Debug)]
pub struct RetryBudget(Arc<AtomicI64>);

impl RetryBudget {
    pub fn new(retries: i64) -> Self {
        Self(Arc::new(AtomicI64::new(retries)))
    }

    /// Atomically consume one retry; false when the budget is exhausted.
    pub fn try_spend(&self) -> bool {
        self.0.fetch_sub(1, Ordering::SeqCst) > 0
    }

    pub fn remaining(&self) -> i64 {
        self.0.load(Ordering::SeqCst).max(0)
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub retryable_status: HashSet<u16>,
    /// Per-request budget shared across a chain of calls; None = unbounded
    pub budget: Option<RetryBudget>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable_status: default_retryable_status(),
            budget: None,
        }
    }
}

impl RetryConfig {
    pub fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Execute `f` with retry logic defined by `config`.
///
/// Returns the first success or the error that stopped the loop: the last
/// retryable error once attempts or budget run out, or the first
/// non-retryable error as-is.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    service: &str,
    operation: &str,
    mut f: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut last_err: Option<CallError> = None;

    for attempt in 0..config.max_attempts.max(1) {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable(&config.retryable_status) => {
                let error_type = err.error_type();
                last_err = Some(err);

                if attempt + 1 >= config.max_attempts.max(1) {
                    break;
                }
                if let Some(budget) = &config.budget {
                    if !budget.try_spend() {
                        warn!(service, operation, "Retry budget exhausted");
                        break;
                    }
                }

                let delay = backoff_delay(attempt, config);
                RETRY_ATTEMPTS_TOTAL
                    .with_label_values(&[service, operation])
                    .inc();
                info!(
                    service,
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error_type,
                    "Retrying downstream call"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| CallError::Transport("retry loop made no attempt".into())))
}

/// delay(attempt) = min(base * multiplier^attempt, max_delay), drawn uniform
/// in [0, delay] when jitter is on. Attempt numbering starts at 0.
fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = config.base_delay.as_secs_f64() * config.multiplier.powi(attempt as i32);
    let capped = exp.min(config.max_delay.as_secs_f64());
    if !config.jitter || capped <= 0.0 {
        return Duration::from_secs_f64(capped.max(0.0));
    }
    let mut rng = rand::thread_rng();
    Duration::from_secs_f64(rng.gen_range(0.0..=capped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&fast_config(), "test", "op", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, CallError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&fast_config(), "test", "op", move || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CallError::Status {
                        status: 503,
                        body: String::new(),
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_status_makes_exactly_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&fast_config(), "test", "op", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<i32, _>(CallError::Status {
                    status: 400,
                    body: "bad request".into(),
                })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(CallError::Status { status: 400, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&fast_config(), "test", "op", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<i32, _>(CallError::Transport("connection reset".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(CallError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_stops_retries_across_shared_calls() {
        let budget = RetryBudget::new(1);
        let config = RetryConfig {
            max_attempts: 5,
            ..fast_config()
        }
        .with_budget(budget.clone());

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&config, "test", "op", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(CallError::Timeout(Duration::from_secs(1))) }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt plus the single budgeted retry.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_backoff_schedule_without_jitter() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(backoff_delay(0, &config), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, &config), Duration::from_millis(200));
        // Capped by max_delay
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(350));
    }

    #[test]
    fn test_full_jitter_stays_within_bounds() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            jitter: true,
            ..Default::default()
        };
        for _ in 0..100 {
            let d = backoff_delay(0, &config);
            assert!(d <= Duration::from_millis(100));
        }
    }
}
