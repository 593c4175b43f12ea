use actix_middleware::{CorrelationIdMiddleware, MetricsMiddleware};
use actix_web::{web, App, HttpServer};
use notifications_service::{
    config::{Config, CONSUMER_GROUP, EVENT_STREAM},
    consumer::NotificationHandler,
    handlers::{self, events::EventState},
    EventLog,
};
use parking_lot::Mutex;
use redis_utils::{KvStore, RedisPool};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use stream_consumer::{ProcessedSet, StreamConsumer};

const SERVICE_NAME: &str = "notifications";

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing("info,actix_web=info");

    let config = Config::from_env();
    tracing::info!(port = config.port, "Starting notifications service");

    let redis_pool = RedisPool::connect(&config.redis_url).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to Redis");
        io::Error::other("Redis connection failed")
    })?;
    let kv = KvStore::new(redis_pool.manager());

    // The consumer's blocking reads get their own connection so they never
    // stall the ingestion path.
    let consumer_pool = RedisPool::connect(&config.redis_url).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect consumer Redis connection");
        io::Error::other("Redis connection failed")
    })?;
    let consumer_kv = KvStore::new(consumer_pool.manager());

    let processed = Arc::new(Mutex::new(ProcessedSet::new(
        4096,
        Duration::from_secs(86_400),
    )));
    let event_log = Arc::new(Mutex::new(EventLog::new(1_000)));

    // Stream consumer shares the dedup set with the HTTP ingestion path.
    let consumer = StreamConsumer::new(consumer_kv, SERVICE_NAME, EVENT_STREAM, CONSUMER_GROUP)
        .with_processed_set(processed.clone());
    let handler = Arc::new(NotificationHandler::new(event_log.clone()));
    tokio::spawn(async move {
        consumer.run(handler).await;
    });

    let state = web::Data::new(EventState {
        processed,
        event_log,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::Data::new(kv.clone()))
            .wrap(MetricsMiddleware::new(SERVICE_NAME))
            .wrap(CorrelationIdMiddleware)
            .route("/health", web::get().to(|| async {
                actix_web::HttpResponse::Ok()
                    .json(serde_json::json!({"status": "ok", "service": SERVICE_NAME}))
            }))
            .route("/ready", web::get().to(|| async {
                actix_web::HttpResponse::Ok().json(serde_json::json!({"status": "ready"}))
            }))
            .route("/metrics", web::get().to(observability::serve_metrics))
            .configure(handlers::register_routes)
    })
    .bind(&addr)?
    .run()
    .await
}
