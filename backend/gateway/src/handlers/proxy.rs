//! Order proxying.
//!
//! The gateway assigns the absolute request deadline here; downstreams only
//! shrink it. Downstream answers below 500 are passed through verbatim,
//! barrier rejections and transport failures map onto the error taxonomy.

use crate::config::Config;
use crate::services::forwarder::{ForwardContext, Forwarder};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_middleware::get_correlation_id;
use error_handling::ServiceError;
use resilience::{CallError, Deadline};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

fn forward_context(req: &HttpRequest, config: &Config) -> ForwardContext {
    ForwardContext {
        correlation_id: get_correlation_id(req),
        deadline: Deadline::after(Duration::from_secs(config.request_deadline_secs)),
        idempotency_key: req
            .headers()
            .get("Idempotency-Key")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string()),
    }
}

fn map_call_error(err: CallError) -> Result<HttpResponse, ServiceError> {
    match err {
        // The downstream answered; relay its status and body verbatim.
        CallError::Status { status, body } => Ok(HttpResponse::build(
            actix_web::http::StatusCode::from_u16(status)
                .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
        )
        .content_type("application/json")
        .body(body)),
        CallError::BreakerOpen {
            downstream,
            retry_after_secs,
        } => Err(ServiceError::BreakerOpen {
            downstream,
            retry_after_secs,
        }),
        CallError::BulkheadFull { downstream } => Err(ServiceError::BulkheadFull { downstream }),
        CallError::DeadlineExceeded => Err(ServiceError::DeadlineExceeded),
        CallError::Transport(msg) => {
            error!(error = %msg, "Orders service unreachable");
            Err(ServiceError::DownstreamUnavailable(
                "Orders service unavailable".to_string(),
            ))
        }
        CallError::Timeout(_) => Err(ServiceError::DownstreamUnavailable(
            "Orders service timed out".to_string(),
        )),
    }
}

async fn relay(
    forwarder: &Forwarder,
    method: reqwest::Method,
    path: &str,
    ctx: &ForwardContext,
    body: Option<web::Bytes>,
) -> Result<HttpResponse, ServiceError> {
    match forwarder.to_orders(method, path, ctx, body).await {
        Ok(res) => Ok(HttpResponse::build(
            actix_web::http::StatusCode::from_u16(res.status)
                .unwrap_or(actix_web::http::StatusCode::OK),
        )
        .content_type("application/json")
        .body(res.body)),
        Err(err) => map_call_error(err),
    }
}

pub async fn create_order(
    req: HttpRequest,
    body: web::Bytes,
    forwarder: web::Data<Arc<Forwarder>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ServiceError> {
    let ctx = forward_context(&req, &config);
    relay(&forwarder, reqwest::Method::POST, "/orders", &ctx, Some(body)).await
}

pub async fn get_order(
    req: HttpRequest,
    path: web::Path<String>,
    forwarder: web::Data<Arc<Forwarder>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ServiceError> {
    let ctx = forward_context(&req, &config);
    let path = format!("/orders/{}", path.into_inner());
    relay(&forwarder, reqwest::Method::GET, &path, &ctx, None).await
}

pub async fn list_orders(
    req: HttpRequest,
    forwarder: web::Data<Arc<Forwarder>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ServiceError> {
    let ctx = forward_context(&req, &config);
    let query = req.query_string();
    let path = if query.is_empty() {
        "/orders".to_string()
    } else {
        format!("/orders?{}", query)
    };
    relay(&forwarder, reqwest::Method::GET, &path, &ctx, None).await
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/orders", web::post().to(create_order))
        .route("/orders", web::get().to(list_orders))
        .route("/orders/{order_id}", web::get().to(get_order));
}
