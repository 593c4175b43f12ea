use actix_middleware::{CorrelationIdMiddleware, LoadShedMiddleware, MetricsMiddleware};
use actix_web::{web, App, HttpServer};
use gateway::{config::Config, handlers, services::Forwarder};
use std::io;
use std::sync::Arc;

const SERVICE_NAME: &str = "gateway";

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing("info,actix_web=info");

    let config = Config::from_env();
    tracing::info!(
        port = config.port,
        max_inflight = config.max_inflight,
        "Starting gateway"
    );

    let forwarder = Arc::new(Forwarder::new(&config.orders_url).map_err(|e| {
        tracing::error!(error = %e, "Failed to build forwarder");
        io::Error::other("HTTP client setup failed")
    })?);

    let addr = format!("0.0.0.0:{}", config.port);
    // One shed counter for the whole process, shared across server workers.
    let load_shed = LoadShedMiddleware::new(SERVICE_NAME, config.max_inflight);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(forwarder.clone()))
            .app_data(web::Data::new(config.clone()))
            // Outer-to-inner: observability first, then admission control.
            .wrap(load_shed.clone())
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
