//! Order HTTP handlers.

use crate::models::CreateOrderRequest;
use crate::repository::OrderRepository;
use crate::services::orchestrator::{OrchestrationResult, OrderOrchestrator};
use crate::services::CallContext;
use actix_middleware::get_correlation_id;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use error_handling::ServiceError;
use resilience::{Deadline, RetryBudget, DEADLINE_HEADER};
use std::sync::Arc;
use uuid::Uuid;

/// Retries allowed across the whole fan-out of one incoming request.
const RETRY_BUDGET_PER_REQUEST: i64 = 3;

#[derive(Debug, serde::Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

pub async fn create_order(
    req: web::Json<CreateOrderRequest>,
    http_req: HttpRequest,
    orchestrator: web::Data<Arc<OrderOrchestrator>>,
) -> Result<HttpResponse, ServiceError> {
    req.validate().map_err(ServiceError::Validation)?;

    let deadline = http_req
        .headers()
        .get(DEADLINE_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(Deadline::from_header);
    if deadline.as_ref().is_some_and(|d| d.is_expired()) {
        return Err(ServiceError::DeadlineExceeded);
    }

    // Key from the header, falling back to the body field.
    let idempotency_key = http_req
        .headers()
        .get("Idempotency-Key")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| req.idempotency_key.clone());

    let ctx = CallContext {
        correlation_id: get_correlation_id(&http_req),
        deadline,
        idempotency_key: idempotency_key.clone(),
        budget: RetryBudget::new(RETRY_BUDGET_PER_REQUEST),
    };

    let result = orchestrator
        .create_order(&req, idempotency_key.as_deref(), &ctx)
        .await?;

    let status = StatusCode::from_u16(result.http_status()).unwrap_or(StatusCode::OK);
    let mut builder = HttpResponse::build(status);
    if let OrchestrationResult::Replayed(_) = &result {
        builder.insert_header(("X-Idempotency-Replayed", "true"));
    }
    let (OrchestrationResult::Completed(body) | OrchestrationResult::Replayed(body)) = result;
    Ok(builder.json(body))
}

pub async fn get_order(
    path: web::Path<String>,
    repo: web::Data<Arc<OrderRepository>>,
) -> Result<HttpResponse, ServiceError> {
    let order_id = Uuid::parse_str(&path.into_inner())
        .map_err(|_| ServiceError::Validation("order id must be a UUID".to_string()))?;
    let order = repo.get(order_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn list_orders(
    params: web::Query<ListParams>,
    repo: web::Data<Arc<OrderRepository>>,
) -> Result<HttpResponse, ServiceError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let orders = repo.list(limit).await?;
    Ok(HttpResponse::Ok().json(orders))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/orders", web::post().to(create_order))
        .route("/orders", web::get().to(list_orders))
        .route("/orders/{order_id}", web::get().to(get_order));
}
