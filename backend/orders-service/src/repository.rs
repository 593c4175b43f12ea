//! Order persistence plus the durable half of the idempotency story.
//!
//! The partial unique index on `idempotency_key` is the last line of defense
//! against concurrent duplicates: when two creators race past the KV-level
//! single-flight lock, exactly one insert commits and the loser reads and
//! returns the winner's row.

use crate::models::{CreateOrderRequest, Order, OrderItem, OrderStatus};
use error_handling::ServiceError;
use observability::metrics::DUPLICATE_WRITE_TOTAL;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Executor, PgPool, Row};
use std::sync::Arc;
use tracing::{info, warn};
use transactional_outbox::{OutboxRepository, SqlxOutboxRepository};
use uuid::Uuid;

const SERVICE_NAME: &str = "orders";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id UUID PRIMARY KEY,
    customer_id TEXT NOT NULL,
    items JSONB NOT NULL,
    total_amount NUMERIC(12,2) NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    idempotency_key TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS orders_idempotency_key_idx
    ON orders (idempotency_key)
    WHERE idempotency_key IS NOT NULL;

CREATE TABLE IF NOT EXISTS outbox_events (
    id UUID PRIMARY KEY,
    aggregate_type TEXT NOT NULL,
    aggregate_id UUID NOT NULL,
    event_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    published BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    published_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS outbox_unpublished_idx
    ON outbox_events (created_at)
    WHERE NOT published;
"#;

/// Result of attempting to create an order under an idempotency key.
pub enum CreateOutcome {
    Created(Order),
    /// Another creator won the unique-index race; this is their row.
    Duplicate(Order),
}

pub struct OrderRepository {
    pool: PgPool,
    outbox: Arc<SqlxOutboxRepository>,
}

impl OrderRepository {
    pub fn new(pool: PgPool, outbox: Arc<SqlxOutboxRepository>) -> Self {
        Self { pool, outbox }
    }

    pub async fn apply_schema(&self) -> Result<(), sqlx::Error> {
        self.pool.execute(SCHEMA).await?;
        Ok(())
    }

    /// Insert the pending order and its `order_created` event atomically.
    pub async fn create_pending(
        &self,
        req: &CreateOrderRequest,
        idempotency_key: Option<&str>,
        total: Decimal,
    ) -> Result<CreateOutcome, ServiceError> {
        let order_id = Uuid::new_v4();
        let items_json = serde_json::to_value(&req.items)
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(ServiceError::from)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, items, total_amount, status, idempotency_key)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            "#,
        )
        .bind(order_id)
        .bind(&req.customer_id)
        .bind(&items_json)
        .bind(total)
        .bind(idempotency_key)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Concurrent duplicate collapsed by the unique index.
                drop(tx);
                DUPLICATE_WRITE_TOTAL
                    .with_label_values(&[SERVICE_NAME, "create_order"])
                    .inc();
                let key = idempotency_key.unwrap_or_default();
                warn!(idempotency_key = %key, "Duplicate order creation collapsed");
                let existing = self.get_by_idempotency_key(key).await?;
                return Ok(CreateOutcome::Duplicate(existing));
            }
            Err(e) => return Err(ServiceError::from(e)),
        }

        self.outbox
            .append(
                &mut tx,
                "order",
                order_id,
                "order_created",
                serde_json::json!({
                    "order_id": order_id,
                    "customer_id": req.customer_id,
                    "total_amount": total,
                }),
            )
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        tx.commit().await.map_err(ServiceError::from)?;

        info!(order_id = %order_id, total = %total, "Order created as pending");
        Ok(CreateOutcome::Created(Order {
            order_id,
            customer_id: req.customer_id.clone(),
            items: req.items.clone(),
            total_amount: total,
            status: OrderStatus::Pending,
            created_at: None,
        }))
    }

    /// Move a pending order to its terminal status and append the
    /// `order_status_updated` event in the same transaction.
    ///
    /// Terminal statuses are never re-entered: a concurrent finalization that
    /// lost the race leaves the row (and the event stream) untouched.
    pub async fn finalize(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await.map_err(ServiceError::from)?;

        let updated = sqlx::query(
            "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(order_id)
        .execute(&mut *tx)
        .await
        .map_err(ServiceError::from)?;

        if updated.rows_affected() > 0 {
            self.outbox
                .append(
                    &mut tx,
                    "order",
                    order_id,
                    "order_status_updated",
                    serde_json::json!({
                        "order_id": order_id,
                        "status": status.as_str(),
                    }),
                )
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?;
        } else {
            warn!(order_id = %order_id, "Order already finalized - status unchanged");
        }

        tx.commit().await.map_err(ServiceError::from)?;
        Ok(())
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        row_to_order(&row)
    }

    pub async fn get_by_idempotency_key(&self, key: &str) -> Result<Order, ServiceError> {
        let row = sqlx::query("SELECT * FROM orders WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| {
                ServiceError::NotFound("Order for idempotency key not found".to_string())
            })?;
        row_to_order(&row)
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<Order>, ServiceError> {
        let rows = sqlx::query("SELECT * FROM orders ORDER BY created_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(ServiceError::from)?;
        rows.iter().map(row_to_order).collect()
    }
}

fn row_to_order(row: &PgRow) -> Result<Order, ServiceError> {
    let items_json: serde_json::Value = row.try_get("items").map_err(ServiceError::from)?;
    let items: Vec<OrderItem> = serde_json::from_value(items_json)
        .map_err(|e| ServiceError::Internal(format!("corrupt items column: {e}")))?;
    let status_raw: String = row.try_get("status").map_err(ServiceError::from)?;
    let status = OrderStatus::from_str(&status_raw)
        .ok_or_else(|| ServiceError::Internal(format!("unknown order status {status_raw}")))?;

    Ok(Order {
        order_id: row.try_get("id").map_err(ServiceError::from)?,
        customer_id: row.try_get("customer_id").map_err(ServiceError::from)?,
        items,
        total_amount: row.try_get("total_amount").map_err(ServiceError::from)?,
        status,
        created_at: row.try_get("created_at").map_err(ServiceError::from)?,
    })
}
