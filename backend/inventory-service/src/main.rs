use actix_middleware::{
    CorrelationIdMiddleware, IdempotencyConfig, IdempotencyMiddleware, MetricsMiddleware,
};
use actix_web::{web, App, HttpServer};
use db_pool::{create_pool, DbConfig};
use inventory_service::{config::Config, handlers, repository::InventoryRepository};
use redis_utils::{KvStore, RedisPool};
use std::io;
use std::sync::Arc;

const SERVICE_NAME: &str = "inventory";

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing("info,actix_web=info");

    let config = Config::from_env();
    tracing::info!(port = config.port, "Starting inventory service");

    let db_pool = create_pool(DbConfig::from_env(SERVICE_NAME))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to database");
            io::Error::other("Database connection failed")
        })?;

    let repo = Arc::new(InventoryRepository::new(db_pool));
    repo.apply_schema().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to apply schema");
        io::Error::other("Schema setup failed")
    })?;

    let redis_pool = RedisPool::connect(&config.redis_url).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to Redis");
        io::Error::other("Redis connection failed")
    })?;
    let kv = KvStore::new(redis_pool.manager());

    let addr = format!("0.0.0.0:{}", config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(repo.clone()))
            .app_data(web::Data::new(kv.clone()))
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
