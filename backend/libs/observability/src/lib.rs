//! Shared Prometheus metrics for all Meridian services
//!
//! Every metric in the fleet is registered here so that import order never
//! matters and the metric names stay consistent across services. Services
//! import the ones they need; unused ones stay at zero.

pub mod metrics;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use metrics::serve_metrics;

/// Install the tracing subscriber used by every service binary.
///
/// Honors `RUST_LOG`; falls back to `info` for the service and actix.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
