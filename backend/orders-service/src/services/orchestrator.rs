//! Order creation orchestration.
//!
//! The pending order and its `order_created` event commit before the fan-out
//! begins, so cancellation or a crash mid-flight always leaves a well-defined
//! state: a pending order whose event the outbox publisher still delivers.
//! Partial downstream failure is not an error here - it folds into a terminal
//! status on the order, and the `order_status_updated` event is the contract
//! by which any compensating saga acts. No charge is auto-reversed.

use crate::models::{
    aggregate_status, CreateOrderRequest, OrderCreatedResponse, OrderStatus,
};
use crate::repository::{CreateOutcome, OrderRepository};
use crate::services::downstream::{CallContext, DownstreamClient};
use error_handling::ServiceError;
use observability::metrics::ORDERS_CREATED_TOTAL;
use std::sync::Arc;
use tracing::error;

pub enum OrchestrationResult {
    /// Fresh order, fan-out complete, terminal status recorded.
    Completed(OrderCreatedResponse),
    /// Collapsed onto an existing order created under the same key.
    Replayed(OrderCreatedResponse),
}

pub struct OrderOrchestrator {
    repo: Arc<OrderRepository>,
    downstream: Arc<DownstreamClient>,
}

impl OrderOrchestrator {
    pub fn new(repo: Arc<OrderRepository>, downstream: Arc<DownstreamClient>) -> Self {
        Self { repo, downstream }
    }

    pub async fn create_order(
        &self,
        req: &CreateOrderRequest,
        idempotency_key: Option<&str>,
        ctx: &CallContext,
    ) -> Result<OrchestrationResult, ServiceError> {
        let total = req.total_amount();

        // Transaction 1: pending order + order_created event, duplicates
        // collapsing on the unique idempotency index.
        let order = match self.repo.create_pending(req, idempotency_key, total).await? {
            CreateOutcome::Created(order) => order,
            CreateOutcome::Duplicate(existing) => {
                return Ok(OrchestrationResult::Replayed(OrderCreatedResponse {
                    order_id: existing.order_id,
                    customer_id: existing.customer_id,
                    status: existing.status,
                    total_amount: existing.total_amount,
                    payment: None,
                    inventory: None,
                }));
            }
        };

        // Concurrent fan-out; both legs share the request's retry budget.
        let (payment_result, inventory_result) = tokio::join!(
            self.downstream.charge(order.order_id, total, ctx),
            self.downstream.reserve(order.order_id, &req.items, ctx),
        );

        if let Err(e) = &payment_result {
            error!(order_id = %order.order_id, error = %e, "Payment call failed");
        }
        if let Err(e) = &inventory_result {
            error!(order_id = %order.order_id, error = %e, "Inventory call failed");
        }

        let status = aggregate_status(payment_result.is_ok(), inventory_result.is_ok());

        // Transaction 2: terminal status + order_status_updated event.
        self.repo.finalize(order.order_id, status).await?;

        ORDERS_CREATED_TOTAL.inc();

        Ok(OrchestrationResult::Completed(OrderCreatedResponse {
            order_id: order.order_id,
            customer_id: order.customer_id,
            status,
            total_amount: total,
            payment: payment_result.ok(),
            inventory: inventory_result.ok(),
        }))
    }
}

impl OrchestrationResult {
    /// HTTP status for the response: 201 only when fully confirmed, 202 for
    /// an order that exists but is not fully successful, 200 for a replay.
    pub fn http_status(&self) -> u16 {
        match self {
            OrchestrationResult::Completed(res) if res.status == OrderStatus::Confirmed => 201,
            OrchestrationResult::Completed(_) => 202,
            OrchestrationResult::Replayed(_) => 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn response(status: OrderStatus) -> OrderCreatedResponse {
        OrderCreatedResponse {
            order_id: Uuid::new_v4(),
            customer_id: "c1".into(),
            status,
            total_amount: Decimal::new(2000, 2),
            payment: None,
            inventory: None,
        }
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            OrchestrationResult::Completed(response(OrderStatus::Confirmed)).http_status(),
            201
        );
        assert_eq!(
            OrchestrationResult::Completed(response(OrderStatus::PaymentFailed)).http_status(),
            202
        );
        assert_eq!(
            OrchestrationResult::Completed(response(OrderStatus::Failed)).http_status(),
            202
        );
        assert_eq!(
            OrchestrationResult::Replayed(response(OrderStatus::Confirmed)).http_status(),
            200
        );
    }
}
