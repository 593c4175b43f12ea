use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle: pending is the only non-terminal status; a terminal
/// status is never re-entered once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    PaymentFailed,
    InventoryFailed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::InventoryFailed => "inventory_failed",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "payment_failed" => Some(OrderStatus::PaymentFailed),
            "inventory_failed" => Some(OrderStatus::InventoryFailed),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

/// Fold the fan-out outcomes into the order's terminal status.
pub fn aggregate_status(payment_ok: bool, inventory_ok: bool) -> OrderStatus {
    match (payment_ok, inventory_ok) {
        (true, true) => OrderStatus::Confirmed,
        (false, true) => OrderStatus::PaymentFailed,
        (true, false) => OrderStatus::InventoryFailed,
        (false, false) => OrderStatus::Failed,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub idempotency_key: Option<String>,
}

impl CreateOrderRequest {
    /// Derived and immutable once written: sum of quantity * unit price.
    pub fn total_amount(&self) -> Decimal {
        self.items
            .iter()
            .map(|i| Decimal::from(i.quantity) * i.unit_price)
            .sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.customer_id.is_empty() {
            return Err("customer_id is required".to_string());
        }
        if self.items.is_empty() {
            return Err("items must not be empty".to_string());
        }
        for item in &self.items {
            if item.quantity <= 0 {
                return Err(format!("quantity must be > 0 for {}", item.product_id));
            }
            if item.unit_price <= Decimal::ZERO {
                return Err(format!("unit_price must be > 0 for {}", item.product_id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub order_id: Uuid,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub created_at: Option<DateTime<Utc>>,
}

/// Body returned from POST /orders; also the idempotency cache snapshot.
#[derive(Debug, Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: Uuid,
    pub customer_id: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub payment: Option<serde_json::Value>,
    pub inventory: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    fn item(product_id: &str, quantity: i32, unit_price: &str) -> OrderItem {
        OrderItem {
            product_id: product_id.into(),
            quantity,
            unit_price: price(unit_price),
        }
    }

    fn request(items: Vec<OrderItem>) -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: "c1".into(),
            items,
            idempotency_key: None,
        }
    }

    #[test]
    fn test_total_is_sum_of_quantity_times_price() {
        let req = request(vec![item("prod-001", 2, "10.00"), item("prod-002", 1, "5.50")]);
        assert_eq!(req.total_amount(), price("25.50"));
    }

    #[test]
    fn test_validation_rejects_bad_items() {
        assert!(request(vec![]).validate().is_err());
        assert!(request(vec![item("prod-001", 0, "10.00")]).validate().is_err());
        assert!(request(vec![item("prod-001", 1, "0.00")]).validate().is_err());
        assert!(request(vec![item("prod-001", 1, "10.00")]).validate().is_ok());
    }

    #[test]
    fn test_status_aggregation_matrix() {
        assert_eq!(aggregate_status(true, true), OrderStatus::Confirmed);
        assert_eq!(aggregate_status(false, true), OrderStatus::PaymentFailed);
        assert_eq!(aggregate_status(true, false), OrderStatus::InventoryFailed);
        assert_eq!(aggregate_status(false, false), OrderStatus::Failed);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::PaymentFailed,
            OrderStatus::InventoryFailed,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::from_str("unknown"), None);
    }
}
