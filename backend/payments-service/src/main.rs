use actix_middleware::{
    CorrelationIdMiddleware, IdempotencyConfig, IdempotencyMiddleware, MetricsMiddleware,
};
use actix_web::{web, App, HttpServer};
use payments_service::{config::Config, handlers};
use redis_utils::{KvStore, RedisPool};
use std::io;

const SERVICE_NAME: &str = "payments";

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing("info,actix_web=info");

    let config = Config::from_env();
    tracing::info!(port = config.port, "Starting payments service");

    // The KV backs idempotency and the chaos knobs; without it the service
    // does not serve traffic.
    let redis_pool = RedisPool::connect(&config.redis_url).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to Redis");
        io::Error::other("Redis connection failed")
    })?;
    let kv = KvStore::new(redis_pool.manager());

    let addr = format!("0.0.0.0:{}", config.port);
    let app_config = config.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(kv.clone()))
            .app_data(web::Data::new(app_config.clone()))
            .wrap(IdempotencyMiddleware::new(
                kv.clone(),
                IdempotencyConfig::new(SERVICE_NAME),
            ))
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
