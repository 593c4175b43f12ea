//! Request forwarding through the resilience stack.
//!
//! Each proxied call runs bulkhead → breaker → retry → HTTP, with the
//! per-hop read timeout capped by the deadline the edge just assigned.

use observability::metrics::{DOWNSTREAM_ERRORS_TOTAL, DOWNSTREAM_REQUESTS_TOTAL};
use resilience::{
    retry_with_backoff, Bulkhead, CallError, CircuitBreaker, CircuitBreakerConfig, Deadline,
    RetryConfig, TimeoutConfig, DEADLINE_HEADER,
};
use actix_web::web::Bytes;
use std::time::Duration;

const SERVICE_NAME: &str = "gateway";

/// Headers stamped onto every forwarded request.
pub struct ForwardContext {
    pub correlation_id: String,
    pub deadline: Deadline,
    pub idempotency_key: Option<String>,
}

/// A downstream response passed back verbatim to the caller.
pub struct ForwardedResponse {
    pub status: u16,
    pub body: Bytes,
}

pub struct Forwarder {
    client: reqwest::Client,
    orders_url: String,
    timeouts: TimeoutConfig,
    orders_breaker: CircuitBreaker,
    orders_bulkhead: Bulkhead,
}

impl Forwarder {
    pub fn new(orders_url: &str) -> Result<Self, CallError> {
        let timeouts = TimeoutConfig::default();
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(CallError::from)?;
        Ok(Self {
            client,
            orders_url: orders_url.trim_end_matches('/').to_string(),
            timeouts,
            orders_breaker: CircuitBreaker::new("orders", CircuitBreakerConfig::default()),
            orders_bulkhead: Bulkhead::new("orders", 50, Duration::from_secs(1)),
        })
    }

    pub fn orders_breaker(&self) -> &CircuitBreaker {
        &self.orders_breaker
    }

    /// Forward a request to the orders service.
    pub async fn to_orders(
        &self,
        method: reqwest::Method,
        path: &str,
        ctx: &ForwardContext,
        body: Option<Bytes>,
    ) -> Result<ForwardedResponse, CallError> {
        let url = format!("{}{}", self.orders_url, path);
        let retry_config = RetryConfig::default();

        self.orders_bulkhead
            .call(|| async {
                self.orders_breaker
                    .call(|| async {
                        retry_with_backoff(&retry_config, SERVICE_NAME, path, || {
                            self.send(method.clone(), &url, ctx, body.clone())
                        })
                        .await
                    })
                    .await
            })
            .await
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        ctx: &ForwardContext,
        body: Option<Bytes>,
    ) -> Result<ForwardedResponse, CallError> {
        DOWNSTREAM_REQUESTS_TOTAL
            .with_label_values(&[SERVICE_NAME, "orders", "forward"])
            .inc();

        if ctx.deadline.is_expired() {
            return Err(CallError::DeadlineExceeded);
        }

        let mut request = self
            .client
            .request(method, url)
            .timeout(ctx.deadline.cap(self.timeouts.read))
            .header("X-Correlation-ID", &ctx.correlation_id)
            .header(DEADLINE_HEADER, ctx.deadline.header_value())
            .header("Content-Type", "application/json");
        if let Some(key) = &ctx.idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let result = async {
            let response = request.send().await.map_err(CallError::from)?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(CallError::from)?;
            // 5xx surfaces as an error so retry and the breaker see it;
            // everything else is the downstream's answer, passed through.
            if status >= 500 {
                return Err(CallError::Status {
                    status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Ok(ForwardedResponse { status, body })
        }
        .await;

        if let Err(err) = &result {
            DOWNSTREAM_ERRORS_TOTAL
                .with_label_values(&[SERVICE_NAME, "orders", "forward", err.error_type()])
                .inc();
        }
        result
    }
}
