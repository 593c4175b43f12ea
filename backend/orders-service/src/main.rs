use actix_middleware::{
    CorrelationIdMiddleware, IdempotencyConfig, IdempotencyMiddleware, MetricsMiddleware,
};
use actix_web::{web, App, HttpServer};
use db_pool::{create_pool, DbConfig};
use orders_service::{
    config::Config,
    handlers,
    repository::OrderRepository,
    services::{DownstreamClient, OrderOrchestrator},
};
use redis_utils::{KvStore, RedisPool};
use resilience::{CircuitBreaker, CircuitBreakerConfig};
use std::io;
use std::sync::Arc;
use transactional_outbox::{HttpEventPublisher, OutboxProcessor, SqlxOutboxRepository};

const SERVICE_NAME: &str = "orders";

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing("info,actix_web=info");

    let config = Config::from_env();
    tracing::info!(port = config.port, "Starting orders service");

    let db_pool = create_pool(DbConfig::from_env(SERVICE_NAME))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to database");
            io::Error::other("Database connection failed")
        })?;

    let outbox_repo = Arc::new(SqlxOutboxRepository::new(db_pool.clone()));
    let repo = Arc::new(OrderRepository::new(db_pool.clone(), outbox_repo.clone()));
    repo.apply_schema().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to apply schema");
        io::Error::other("Schema setup failed")
    })?;

    let redis_pool = RedisPool::connect(&config.redis_url).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to Redis");
        io::Error::other("Redis connection failed")
    })?;
    let kv = KvStore::new(redis_pool.manager());

    // Breakers mirror trips into the KV so sibling replicas fast-fail while
    // one probes; they keep working replica-local when Redis is down.
    let payments_breaker = CircuitBreaker::new("payments", CircuitBreakerConfig::default())
        .with_shared_state(kv.clone());
    let inventory_breaker = CircuitBreaker::new("inventory", CircuitBreakerConfig::default())
        .with_shared_state(kv.clone());

    let downstream = Arc::new(
        DownstreamClient::new(
            &config.payments_url,
            &config.inventory_url,
            payments_breaker,
            inventory_breaker,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build downstream client");
            io::Error::other("HTTP client setup failed")
        })?,
    );
    let orchestrator = Arc::new(OrderOrchestrator::new(repo.clone(), downstream.clone()));

    // Singleton publisher loop delivering outbox events to notifications.
    let publisher = Arc::new(
        HttpEventPublisher::new(&config.notifications_url).map_err(|e| {
            tracing::error!(error = %e, "Failed to build event publisher");
            io::Error::other("Event publisher setup failed")
        })?,
    );
    let processor = OutboxProcessor::new(db_pool, outbox_repo, publisher, SERVICE_NAME);
    tokio::spawn(async move {
        processor.run().await;
    });

    let addr = format!("0.0.0.0:{}", config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(repo.clone()))
            .app_data(web::Data::new(orchestrator.clone()))
            .app_data(web::Data::new(downstream.clone()))
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
