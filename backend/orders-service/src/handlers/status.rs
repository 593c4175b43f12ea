//! Breaker state reporting for the orders fan-out downstreams.

use crate::services::DownstreamClient;
use actix_web::{web, HttpResponse};
use std::sync::Arc;

pub async fn breaker_status(downstream: web::Data<Arc<DownstreamClient>>) -> HttpResponse {
    let mut states = serde_json::Map::new();
    for breaker in downstream.breakers() {
        states.insert(
            breaker.name().to_string(),
            serde_json::Value::String(breaker.state().as_str().to_string()),
        );
    }
    HttpResponse::Ok().json(states)
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/status/breakers", web::get().to(breaker_status));
}
