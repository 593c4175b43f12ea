//! Downstream HTTP clients for payments and inventory.
//!
//! Every call travels bulkhead → breaker → retry → HTTP with a per-hop read
//! timeout capped by the remaining request deadline. Correlation id, deadline
//! and idempotency key headers are forwarded verbatim.

use crate::models::OrderItem;
use observability::metrics::{DOWNSTREAM_ERRORS_TOTAL, DOWNSTREAM_REQUESTS_TOTAL};
use resilience::{
    retry_with_backoff, Bulkhead, CallError, CircuitBreaker, Deadline, RetryBudget, RetryConfig,
    TimeoutConfig, DEADLINE_HEADER,
};
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

const SERVICE_NAME: &str = "orders";

/// Request-scoped context threaded into every downstream call.
#[derive(Clone)]
pub struct CallContext {
    pub correlation_id: String,
    pub deadline: Option<Deadline>,
    pub idempotency_key: Option<String>,
    /// Shared across the whole fan-out of one incoming request
    pub budget: RetryBudget,
}

pub struct DownstreamClient {
    client: reqwest::Client,
    payments_url: String,
    inventory_url: String,
    timeouts: TimeoutConfig,
    payments_breaker: CircuitBreaker,
    inventory_breaker: CircuitBreaker,
    payments_bulkhead: Bulkhead,
    inventory_bulkhead: Bulkhead,
}

impl DownstreamClient {
    pub fn new(
        payments_url: &str,
        inventory_url: &str,
        payments_breaker: CircuitBreaker,
        inventory_breaker: CircuitBreaker,
    ) -> Result<Self, CallError> {
        let timeouts = TimeoutConfig::default();
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(CallError::from)?;
        Ok(Self {
            client,
            payments_url: payments_url.trim_end_matches('/').to_string(),
            inventory_url: inventory_url.trim_end_matches('/').to_string(),
            timeouts,
            payments_breaker,
            inventory_breaker,
            payments_bulkhead: Bulkhead::new("payments", 20, Duration::from_secs(1)),
            inventory_bulkhead: Bulkhead::new("inventory", 20, Duration::from_secs(1)),
        })
    }

    pub fn breakers(&self) -> [&CircuitBreaker; 2] {
        [&self.payments_breaker, &self.inventory_breaker]
    }

    pub async fn charge(
        &self,
        order_id: Uuid,
        amount: Decimal,
        ctx: &CallContext,
    ) -> Result<serde_json::Value, CallError> {
        let url = format!("{}/payments/charge", self.payments_url);
        let body = serde_json::json!({ "order_id": order_id, "amount": amount });
        let retry_config = self.retry_config(ctx);

        self.payments_bulkhead
            .call(|| async {
                self.payments_breaker
                    .call(|| async {
                        retry_with_backoff(&retry_config, SERVICE_NAME, "charge", || {
                            self.post_json(&url, &body, ctx, "payments", "charge")
                        })
                        .await
                    })
                    .await
            })
            .await
    }

    pub async fn reserve(
        &self,
        order_id: Uuid,
        items: &[OrderItem],
        ctx: &CallContext,
    ) -> Result<serde_json::Value, CallError> {
        let url = format!("{}/inventory/reserve", self.inventory_url);
        let body = serde_json::json!({ "order_id": order_id, "items": items });
        let retry_config = self.retry_config(ctx);

        self.inventory_bulkhead
            .call(|| async {
                self.inventory_breaker
                    .call(|| async {
                        retry_with_backoff(&retry_config, SERVICE_NAME, "reserve", || {
                            self.post_json(&url, &body, ctx, "inventory", "reserve")
                        })
                        .await
                    })
                    .await
            })
            .await
    }

    fn retry_config(&self, ctx: &CallContext) -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            ..Default::default()
        }
        .with_budget(ctx.budget.clone())
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        ctx: &CallContext,
        to_service: &str,
        operation: &str,
    ) -> Result<serde_json::Value, CallError> {
        DOWNSTREAM_REQUESTS_TOTAL
            .with_label_values(&[SERVICE_NAME, to_service, operation])
            .inc();

        let read_timeout = match &ctx.deadline {
            Some(deadline) if deadline.is_expired() => {
                return Err(CallError::DeadlineExceeded);
            }
            Some(deadline) => deadline.cap(self.timeouts.read),
            None => self.timeouts.read,
        };

        let mut request = self
            .client
            .post(url)
            .json(body)
            .timeout(read_timeout)
            .header("X-Correlation-ID", &ctx.correlation_id);
        if let Some(deadline) = &ctx.deadline {
            request = request.header(DEADLINE_HEADER, deadline.header_value());
        }
        if let Some(key) = &ctx.idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let result = async {
            let response = request.send().await.map_err(CallError::from)?;
            let status = response.status().as_u16();
            if status < 300 {
                response.json().await.map_err(CallError::from)
            } else {
                let body = response.text().await.unwrap_or_default();
                Err(CallError::Status { status, body })
            }
        }
        .await;

        if let Err(err) = &result {
            DOWNSTREAM_ERRORS_TOTAL
                .with_label_values(&[SERVICE_NAME, to_service, operation, err.error_type()])
                .inc();
        }
        result
    }
}
