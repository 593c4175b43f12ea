//! Breaker state reporting.

use crate::services::forwarder::Forwarder;
use actix_web::{web, HttpResponse};
use std::sync::Arc;

pub async fn breaker_status(forwarder: web::Data<Arc<Forwarder>>) -> HttpResponse {
    let mut states = serde_json::Map::new();
    let breaker = forwarder.orders_breaker();
    states.insert(
        breaker.name().to_string(),
        serde_json::Value::String(breaker.state().as_str().to_string()),
    );
    HttpResponse::Ok().json(states)
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/status/breakers", web::get().to(breaker_status));
}
