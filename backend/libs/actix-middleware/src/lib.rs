//! Actix middleware shared by all Meridian services
//!
//! - `CorrelationIdMiddleware`: assigns/propagates `X-Correlation-ID`
//! - `MetricsMiddleware`: per-request Prometheus counters and latency
//! - `LoadShedMiddleware`: inflight-count admission control at the edge
//! - `IdempotencyMiddleware`: response cache + single-flight lock keyed by
//!   the `Idempotency-Key` header

pub mod correlation_id;
pub mod idempotency;
pub mod load_shed;
pub mod metrics;

pub use correlation_id::{get_correlation_id, CorrelationId, CorrelationIdMiddleware};
pub use idempotency::{IdempotencyConfig, IdempotencyMiddleware};
pub use load_shed::LoadShedMiddleware;
pub use metrics::MetricsMiddleware;

/// Paths exempt from admission control and idempotency handling.
pub fn default_skip_paths() -> std::collections::HashSet<String> {
    ["/health", "/ready", "/metrics"]
        .into_iter()
        .map(String::from)
        .collect()
}
