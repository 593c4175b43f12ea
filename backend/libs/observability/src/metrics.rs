use actix_web::HttpResponse;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static::lazy_static! {
    // HTTP layer
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "http_requests_total",
        "Total HTTP requests",
        &["service", "route", "method", "status"]
    ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: HistogramVec = prometheus::register_histogram_vec!(
        "request_duration_seconds",
        "HTTP request duration",
        &["service", "route", "method"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Downstream calls
    pub static ref DOWNSTREAM_REQUESTS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "downstream_requests_total",
        "Outgoing calls to downstream services",
        &["from_service", "to_service", "operation"]
    ).unwrap();

    pub static ref DOWNSTREAM_ERRORS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "downstream_errors_total",
        "Failed outgoing calls to downstream services",
        &["from_service", "to_service", "operation", "error_type"]
    ).unwrap();

    // Resilience patterns
    pub static ref RETRY_ATTEMPTS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "retry_attempts_total",
        "Number of retry attempts",
        &["service", "operation"]
    ).unwrap();

    pub static ref BREAKER_STATE: IntGaugeVec = prometheus::register_int_gauge_vec!(
        "breaker_state",
        "Circuit breaker state: 0=closed 1=open 2=half_open",
        &["downstream"]
    ).unwrap();

    pub static ref BREAKER_OPEN_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "breaker_open_total",
        "Number of times the circuit breaker tripped to open",
        &["downstream"]
    ).unwrap();

    pub static ref BULKHEAD_REJECTIONS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "bulkhead_rejections_total",
        "Requests rejected by the bulkhead",
        &["downstream"]
    ).unwrap();

    pub static ref IDEMPOTENCY_HITS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "idempotency_hits_total",
        "Idempotent requests served from cache",
        &["service"]
    ).unwrap();

    pub static ref IDEMPOTENCY_CONFLICTS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "idempotency_conflicts_total",
        "Concurrent duplicate requests detected",
        &["service"]
    ).unwrap();

    pub static ref LOAD_SHED_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "load_shed_total",
        "Requests shed by admission control",
        &["service"]
    ).unwrap();

    // Outbox
    pub static ref OUTBOX_PUBLISHED_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "outbox_published_total",
        "Outbox events successfully published",
        &["service", "event_type"]
    ).unwrap();

    pub static ref OUTBOX_PENDING: IntGaugeVec = prometheus::register_int_gauge_vec!(
        "outbox_pending",
        "Current number of unpublished outbox events",
        &["service"]
    ).unwrap();

    // Business metrics
    pub static ref DUPLICATE_WRITE_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "duplicate_write_total",
        "Duplicate write attempts detected",
        &["service", "operation"]
    ).unwrap();

    pub static ref ORDERS_CREATED_TOTAL: IntCounter = prometheus::register_int_counter!(
        "orders_created_total",
        "Total orders created"
    ).unwrap();
}

/// Render the default registry for a Prometheus scrape.
pub async fn serve_metrics() -> HttpResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_state_gauge_values() {
        BREAKER_STATE.with_label_values(&["payments"]).set(1);
        assert_eq!(BREAKER_STATE.with_label_values(&["payments"]).get(), 1);
        BREAKER_STATE.with_label_values(&["payments"]).set(0);
        assert_eq!(BREAKER_STATE.with_label_values(&["payments"]).get(), 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let before = RETRY_ATTEMPTS_TOTAL
            .with_label_values(&["orders", "charge"])
            .get();
        RETRY_ATTEMPTS_TOTAL
            .with_label_values(&["orders", "charge"])
            .inc();
        assert_eq!(
            RETRY_ATTEMPTS_TOTAL
                .with_label_values(&["orders", "charge"])
                .get(),
            before + 1
        );
    }
}
