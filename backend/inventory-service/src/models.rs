use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveItem {
    pub product_id: String,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub order_id: String,
    pub items: Vec<ReserveItem>,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub order_id: String,
    pub reservation_ids: Vec<uuid::Uuid>,
    pub status: String,
    pub items: Vec<ReserveItem>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub stock: i32,
    pub reserved: i32,
}

impl Product {
    pub fn available(&self) -> i32 {
        self.stock - self.reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_stock() {
        let product = Product {
            id: "prod-001".into(),
            name: "Widget A".into(),
            stock: 100,
            reserved: 30,
        };
        assert_eq!(product.available(), 70);
    }
}
