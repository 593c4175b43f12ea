//! Reservation handlers.

use crate::chaos;
use crate::models::{ReserveRequest, ReserveResponse};
use crate::repository::InventoryRepository;
use actix_web::{web, HttpRequest, HttpResponse};
use error_handling::ServiceError;
use redis_utils::KvStore;
use std::sync::Arc;
use tracing::warn;

pub async fn reserve(
    req: web::Json<ReserveRequest>,
    http_req: HttpRequest,
    repo: web::Data<Arc<InventoryRepository>>,
    kv: web::Data<KvStore>,
) -> Result<HttpResponse, ServiceError> {
    if req.items.is_empty() {
        return Err(ServiceError::Validation("items must not be empty".to_string()));
    }
    if req.items.iter().any(|i| i.quantity <= 0) {
        return Err(ServiceError::Validation(
            "quantity must be greater than zero".to_string(),
        ));
    }

    let faults = chaos::current_faults(&kv).await;
    chaos::inject_lock_contention(faults.lock_contention_ms).await;
    if chaos::should_fail(faults.error_rate) {
        warn!(order_id = %req.order_id, "Inventory fault injected");
        return Err(ServiceError::Unavailable(
            "Inventory DB lock timeout".to_string(),
        ));
    }

    let idempotency_key = http_req
        .headers()
        .get("Idempotency-Key")
        .and_then(|h| h.to_str().ok());

    let reservation_ids = repo
        .reserve(&req.order_id, &req.items, idempotency_key)
        .await?;

    Ok(HttpResponse::Ok().json(ReserveResponse {
        order_id: req.order_id.clone(),
        reservation_ids,
        status: "reserved".to_string(),
        items: req.items.clone(),
    }))
}

pub async fn get_stock(
    path: web::Path<String>,
    repo: web::Data<Arc<InventoryRepository>>,
) -> Result<HttpResponse, ServiceError> {
    let product = repo.get_product(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "product_id": product.id,
        "name": product.name,
        "stock": product.stock,
        "reserved": product.reserved,
        "available": product.available(),
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/inventory/reserve", web::post().to(reserve))
        .route("/inventory/{product_id}", web::get().to(get_stock));
}
