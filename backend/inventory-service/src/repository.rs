//! Stock and reservation persistence.
//!
//! Reservations are serialized per product by `SELECT ... FOR UPDATE` on the
//! product row; concurrent duplicates of the same idempotency key collapse on
//! the partial unique index over (idempotency_key, product_id).

use crate::models::{Product, ReserveItem};
use error_handling::ServiceError;
use sqlx::{Executor, PgPool};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    stock INTEGER NOT NULL DEFAULT 0,
    reserved INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS reservations (
    id UUID PRIMARY KEY,
    order_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    idempotency_key TEXT,
    status TEXT NOT NULL DEFAULT 'reserved',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS reservations_idempotency_product_idx
    ON reservations (idempotency_key, product_id)
    WHERE idempotency_key IS NOT NULL;

INSERT INTO products (id, name, stock) VALUES
    ('prod-001', 'Widget A', 1000),
    ('prod-002', 'Widget B', 500),
    ('prod-003', 'Gadget X', 200),
    ('prod-004', 'Gadget Y', 100)
ON CONFLICT (id) DO NOTHING;
"#;

pub struct InventoryRepository {
    pool: PgPool,
}

impl InventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn apply_schema(&self) -> Result<(), sqlx::Error> {
        self.pool.execute(SCHEMA).await?;
        Ok(())
    }

    /// Reserve stock for every item of an order in one transaction.
    ///
    /// Any insufficient-stock item aborts the whole reservation with 409.
    /// Unknown products are admitted without a stock check (testbed seed data
    /// is small; unknown ids come from generated load).
    pub async fn reserve(
        &self,
        order_id: &str,
        items: &[ReserveItem],
        idempotency_key: Option<&str>,
    ) -> Result<Vec<Uuid>, ServiceError> {
        let mut tx = self.pool.begin().await.map_err(ServiceError::from)?;
        let mut reservation_ids = Vec::with_capacity(items.len());

        for item in items {
            let product = sqlx::query_as::<_, Product>(
                "SELECT id, name, stock, reserved FROM products WHERE id = $1 FOR UPDATE",
            )
            .bind(&item.product_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ServiceError::from)?;

            if let Some(product) = &product {
                let available = product.available();
                if available < item.quantity {
                    return Err(ServiceError::Conflict(format!(
                        "Insufficient stock for {}: available={}, requested={}",
                        item.product_id, available, item.quantity
                    )));
                }
            }

            let reservation_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO reservations (id, order_id, product_id, quantity, idempotency_key)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (idempotency_key, product_id)
                    WHERE idempotency_key IS NOT NULL
                    DO NOTHING
                "#,
            )
            .bind(reservation_id)
            .bind(order_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(idempotency_key)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::from)?;

            if product.is_some() {
                sqlx::query("UPDATE products SET reserved = reserved + $1 WHERE id = $2")
                    .bind(item.quantity)
                    .bind(&item.product_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(ServiceError::from)?;
            }

            reservation_ids.push(reservation_id);
        }

        tx.commit().await.map_err(ServiceError::from)?;
        info!(order_id, items = items.len(), "Inventory reserved");
        Ok(reservation_ids)
    }

    pub async fn get_product(&self, product_id: &str) -> Result<Product, ServiceError> {
        sqlx::query_as::<_, Product>(
            "SELECT id, name, stock, reserved FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} not found")))
    }
}
