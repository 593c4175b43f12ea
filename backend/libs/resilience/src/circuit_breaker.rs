//! Circuit breaker with a rolling failure window.
//!
//! State transitions:
//! - Closed → Open: failure_threshold failures within the rolling window
//! - Open → HalfOpen: after open_duration
//! - HalfOpen → Closed: success_threshold consecutive successes
//! - HalfOpen → Open: on any single failure
//!
//! One breaker per downstream name. State is replica-local behind a mutex;
//! optionally a trip is mirrored into Redis so sibling replicas fast-fail
//! while one probes. The shared path is best-effort only: when Redis is
//! unavailable the breaker keeps working on local state.

use crate::error::CallError;
use observability::metrics::{BREAKER_OPEN_TOTAL, BREAKER_STATE};
use parking_lot::Mutex;
use redis_utils::KvStore;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Fast-failing, requests short-circuit
    Open,
    /// Probing whether the downstream recovered
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that trip the breaker
    pub failure_threshold: usize,
    /// Consecutive half-open successes required to close
    pub success_threshold: u32,
    /// How long to stay open before probing
    pub open_duration: Duration,
    /// Rolling window for failure accounting
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    /// Monotonic timestamps of failures inside the window
    failures: VecDeque<Instant>,
    half_open_successes: u32,
    /// Defined iff state == Open
    opened_at: Option<Instant>,
}

/// Cached view of the cross-replica open flag, refreshed at most once per
/// second to keep the KV off the hot path.
struct SharedState {
    kv: KvStore,
    cache: Mutex<(Instant, bool)>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    shared: Option<Arc<SharedState>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        BREAKER_STATE.with_label_values(&[name]).set(0);
        Self {
            name: name.to_string(),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                half_open_successes: 0,
                opened_at: None,
            })),
            shared: None,
        }
    }

    /// Mirror trips into the KV so other replicas fast-fail while this one
    /// probes. Correctness does not depend on it.
    pub fn with_shared_state(mut self, kv: KvStore) -> Self {
        let stale = Instant::now()
            .checked_sub(Duration::from_secs(60))
            .unwrap_or_else(Instant::now);
        self.shared = Some(Arc::new(SharedState {
            kv,
            cache: Mutex::new((stale, false)),
        }));
        self
    }

    /// Execute `f` through the breaker.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        if self.should_reject() || self.shared_says_open().await {
            warn!(breaker = %self.name, "Circuit breaker open - failing fast");
            return Err(CallError::BreakerOpen {
                downstream: self.name.clone(),
                retry_after_secs: self.config.open_duration.as_secs(),
            });
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(err) => {
                if err.is_transient() {
                    self.record_failure();
                }
                Err(err)
            }
        }
    }

    /// Like [`call`], but invokes `fallback` instead of failing when open.
    pub async fn call_with_fallback<F, Fut, FB, FutB, T>(
        &self,
        f: F,
        fallback: FB,
    ) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = Result<T, CallError>>,
    {
        match self.call(f).await {
            Err(CallError::BreakerOpen { .. }) => fallback().await,
            other => other,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn should_reject(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    info!(breaker = %self.name, "Circuit breaker: open -> half_open");
                    inner.state = CircuitState::HalfOpen;
                    inner.opened_at = None;
                    inner.half_open_successes = 0;
                    inner.failures.clear();
                    self.publish_state(CircuitState::HalfOpen);
                    false
                } else {
                    true
                }
            }
            CircuitState::Closed => {
                if let Some(cutoff) = Instant::now().checked_sub(self.config.window) {
                    while inner.failures.front().is_some_and(|t| *t < cutoff) {
                        inner.failures.pop_front();
                    }
                }
                false
            }
            CircuitState::HalfOpen => false,
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                info!(breaker = %self.name, "Circuit breaker: half_open -> closed");
                inner.state = CircuitState::Closed;
                inner.failures.clear();
                inner.half_open_successes = 0;
                self.publish_state(CircuitState::Closed);
                self.clear_shared_flag();
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::HalfOpen => {
                // A single failed probe re-opens immediately
                self.trip(&mut inner, now);
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                if let Some(cutoff) = now.checked_sub(self.config.window) {
                    while inner.failures.front().is_some_and(|t| *t < cutoff) {
                        inner.failures.pop_front();
                    }
                }
                if inner.failures.len() >= self.config.failure_threshold {
                    self.trip(&mut inner, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        warn!(
            breaker = %self.name,
            failures = inner.failures.len(),
            "Circuit breaker tripped"
        );
        // The window is left intact here; it is cleared on the open ->
        // half_open transition and when a probe run closes the breaker.
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        BREAKER_OPEN_TOTAL.with_label_values(&[&self.name]).inc();
        self.publish_state(CircuitState::Open);
        self.set_shared_flag();
    }

    fn publish_state(&self, state: CircuitState) {
        BREAKER_STATE
            .with_label_values(&[&self.name])
            .set(state.as_gauge());
    }

    fn shared_key(&self) -> String {
        format!("breaker:{}:open", self.name)
    }

    /// Consult the cross-replica flag when locally closed. Any KV trouble
    /// degrades to replica-local state.
    async fn shared_says_open(&self) -> bool {
        let Some(shared) = &self.shared else {
            return false;
        };
        if self.state() != CircuitState::Closed {
            return false;
        }
        {
            let cache = shared.cache.lock();
            if cache.0.elapsed() < Duration::from_secs(1) {
                return cache.1;
            }
        }
        let open = matches!(shared.kv.get(&self.shared_key()).await, Ok(Some(_)));
        *shared.cache.lock() = (Instant::now(), open);
        open
    }

    fn set_shared_flag(&self) {
        if let Some(shared) = &self.shared {
            let kv = shared.kv.clone();
            let key = self.shared_key();
            let ttl = self.config.open_duration.as_secs().max(1);
            tokio::spawn(async move {
                if let Err(e) = kv.set_with_ttl(&key, "1", ttl).await {
                    warn!(error = %e, "Failed to publish breaker state to Redis");
                }
            });
        }
    }

    fn clear_shared_flag(&self) {
        if let Some(shared) = &self.shared {
            let kv = shared.kv.clone();
            let key = self.shared_key();
            tokio::spawn(async move {
                let _ = kv.delete(&key).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> Result<(), CallError> {
        Err(CallError::Status {
            status: 503,
            body: String::new(),
        })
    }

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test-downstream", config)
    }

    #[tokio::test]
    async fn test_trips_after_threshold_failures_in_window() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            let _ = cb.call(|| async { fail() }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Next call short-circuits without invoking the closure
        let result = cb.call(|| async { Ok::<_, CallError>(()) }).await;
        assert!(matches!(result, Err(CallError::BreakerOpen { .. })));
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_trip() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        for _ in 0..5 {
            let _ = cb
                .call(|| async {
                    Err::<(), _>(CallError::Status {
                        status: 400,
                        body: String::new(),
                    })
                })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_to_half_open_after_open_duration() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            open_duration: Duration::from_millis(50),
            ..Default::default()
        });

        for _ in 0..2 {
            let _ = cb.call(|| async { fail() }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = cb.call(|| async { Ok::<_, CallError>(()) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_consecutive_successes() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            open_duration: Duration::from_millis(50),
            ..Default::default()
        });

        for _ in 0..2 {
            let _ = cb.call(|| async { fail() }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        for _ in 0..2 {
            let _ = cb.call(|| async { Ok::<_, CallError>(()) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_single_half_open_failure_reopens() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            open_duration: Duration::from_millis(50),
            ..Default::default()
        });

        for _ in 0..2 {
            let _ = cb.call(|| async { fail() }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = cb.call(|| async { Ok::<_, CallError>(()) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_window_expiry_forgets_old_failures() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            window: Duration::from_millis(50),
            ..Default::default()
        });

        let _ = cb.call(|| async { fail() }).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        // The earlier failure has aged out; one more does not trip.
        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_fallback_invoked_when_open() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb
            .call_with_fallback(
                || async { Ok::<_, CallError>("primary") },
                || async { Ok("fallback") },
            )
            .await;
        assert_eq!(result.unwrap(), "fallback");
    }
}
