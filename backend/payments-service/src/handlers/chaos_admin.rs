//! Runtime chaos configuration endpoints.

use crate::chaos::{ERROR_RATE_KEY, LATENCY_KEY};
use actix_web::{web, HttpResponse};
use error_handling::ServiceError;
use redis_utils::KvStore;
use serde::Deserialize;
use tracing::info;

const CHAOS_TTL_SECS: u64 = 86_400;

#[derive(Debug, Deserialize)]
pub struct ChaosParams {
    pub latency_ms: Option<f64>,
    pub error_rate: Option<f64>,
}

pub async fn set_chaos(
    params: web::Query<ChaosParams>,
    kv: web::Data<KvStore>,
) -> Result<HttpResponse, ServiceError> {
    if let Some(latency_ms) = params.latency_ms {
        kv.set_with_ttl(LATENCY_KEY, &latency_ms.to_string(), CHAOS_TTL_SECS)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
    }
    if let Some(error_rate) = params.error_rate {
        kv.set_with_ttl(ERROR_RATE_KEY, &error_rate.to_string(), CHAOS_TTL_SECS)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
    }
    info!(
        latency_ms = ?params.latency_ms,
        error_rate = ?params.error_rate,
        "Chaos config updated"
    );
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "updated",
        "latency_ms": params.latency_ms,
        "error_rate": params.error_rate,
    })))
}

pub async fn clear_chaos(kv: web::Data<KvStore>) -> Result<HttpResponse, ServiceError> {
    for key in [LATENCY_KEY, ERROR_RATE_KEY] {
        kv.delete(key)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
    }
    info!("Chaos config cleared");
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "cleared"})))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/chaos/config", web::post().to(set_chaos))
        .route("/chaos/config", web::delete().to(clear_chaos));
}
