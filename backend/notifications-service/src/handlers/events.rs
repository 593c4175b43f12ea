//! Event ingestion endpoint, idempotent by event id.
//!
//! The outbox publisher retries deliveries until a 2xx is recorded, so a
//! duplicate POST is a normal occurrence: it is acknowledged (200) without a
//! second side effect, flagged as replayed, and counted.

use crate::config::EVENT_STREAM;
use crate::event_log::EventLog;
use actix_web::{web, HttpResponse};
use error_handling::ServiceError;
use observability::metrics::DUPLICATE_WRITE_TOTAL;
use parking_lot::Mutex;
use redis_utils::KvStore;
use serde::Deserialize;
use std::sync::Arc;
use stream_consumer::ProcessedSet;
use tracing::{info, warn};

const SERVICE_NAME: &str = "notifications";

#[derive(Debug, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

pub struct EventState {
    pub processed: Arc<Mutex<ProcessedSet>>,
    pub event_log: Arc<Mutex<EventLog>>,
}

pub async fn receive_event(
    event: web::Json<EventPayload>,
    state: web::Data<EventState>,
    kv: web::Data<KvStore>,
) -> Result<HttpResponse, ServiceError> {
    if event.event_type.is_empty() || event.aggregate_id.is_empty() {
        return Err(ServiceError::Validation(
            "event_type and aggregate_id are required".to_string(),
        ));
    }

    let event_id = format!("{}:{}", event.event_type, event.aggregate_id);

    if state.processed.lock().contains(&event_id) {
        DUPLICATE_WRITE_TOTAL
            .with_label_values(&[SERVICE_NAME, "receive_event"])
            .inc();
        return Ok(HttpResponse::Ok()
            .insert_header(("X-Idempotency-Replayed", "true"))
            .json(serde_json::json!({
                "status": "already_processed",
                "event_id": event_id,
            })));
    }

    state.processed.lock().insert(&event_id);
    state.event_log.lock().push(serde_json::json!({
        "event_id": event_id,
        "event_type": event.event_type,
        "aggregate_id": event.aggregate_id,
        "payload": event.payload,
        "received_at": chrono::Utc::now().to_rfc3339(),
    }));

    // Fan out to stream consumers; ingestion succeeds even when the stream
    // append fails since the event is already recorded here.
    let payload_raw = event.payload.to_string();
    let append = kv
        .stream_append(
            EVENT_STREAM,
            &[
                ("event_id", event_id.as_str()),
                ("event_type", event.event_type.as_str()),
                ("aggregate_id", event.aggregate_id.as_str()),
                ("payload", payload_raw.as_str()),
            ],
        )
        .await;
    if let Err(e) = append {
        warn!(error = %e, "Failed to append event to stream");
    }

    info!(
        event_type = %event.event_type,
        aggregate_id = %event.aggregate_id,
        "Event received"
    );
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "status": "accepted",
        "event_id": event_id,
    })))
}

pub async fn list_events(
    params: web::Query<ListParams>,
    state: web::Data<EventState>,
) -> HttpResponse {
    let log = state.event_log.lock();
    let events = log.tail(params.limit.unwrap_or(50));
    HttpResponse::Ok().json(serde_json::json!({
        "events": events,
        "total": log.len(),
    }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/events", web::post().to(receive_event))
        .route("/events", web::get().to(list_events));
}
