//! Charge handler
//!
//! The charge itself is simulated; what matters for the testbed is the
//! latency/fault injection in front of it and the idempotent replay behavior
//! provided by the idempotency middleware wrapping this route.

use crate::chaos::{self, FaultConfig};
use crate::config::Config;
use actix_web::{web, HttpResponse};
use error_handling::ServiceError;
use redis_utils::KvStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    pub order_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub transaction_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub status: String,
    pub timestamp: String,
}

pub async fn charge(
    req: web::Json<ChargeRequest>,
    kv: web::Data<KvStore>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ServiceError> {
    if req.amount <= Decimal::ZERO {
        return Err(ServiceError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }

    let defaults = FaultConfig {
        latency_ms: config.fault_latency_ms,
        error_rate: config.fault_error_rate,
    };
    let faults = chaos::current_faults(&kv, defaults).await;

    chaos::inject_latency(faults.latency_ms).await;

    if chaos::should_fail(faults.error_rate) {
        warn!(order_id = %req.order_id, "Payment fault injected");
        return Err(ServiceError::Unavailable(
            "Payment processor temporarily unavailable".to_string(),
        ));
    }

    let transaction_id = Uuid::new_v4().to_string();
    info!(
        order_id = %req.order_id,
        amount = %req.amount,
        transaction_id = %transaction_id,
        "Payment charged"
    );

    Ok(HttpResponse::Ok().json(ChargeResponse {
        transaction_id,
        order_id: req.order_id.clone(),
        amount: req.amount,
        status: "charged".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn get_payment(path: web::Path<String>) -> HttpResponse {
    // Charges are not persisted in the testbed; answer the shape callers expect.
    HttpResponse::Ok().json(serde_json::json!({
        "transaction_id": path.into_inner(),
        "status": "charged",
    }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/payments/charge", web::post().to(charge))
        .route("/payments/{transaction_id}", web::get().to(get_payment));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_request_rejects_non_positive_amount() {
        let req: ChargeRequest =
            serde_json::from_value(serde_json::json!({"order_id": "o1", "amount": 0.0})).unwrap();
        assert!(req.amount <= Decimal::ZERO);

        let req: ChargeRequest =
            serde_json::from_value(serde_json::json!({"order_id": "o1", "amount": 12.5})).unwrap();
        assert!(req.amount > Decimal::ZERO);
    }
}
