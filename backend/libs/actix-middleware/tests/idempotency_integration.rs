//! Integration tests for the idempotency middleware.
//!
//! Prerequisites:
//! - Redis reachable via REDIS_URL
//!
//! Run:
//! ```bash
//! export REDIS_URL="redis://localhost:6379"
//! cargo test --package actix-middleware --test idempotency_integration -- --ignored
//! ```

use actix_middleware::{IdempotencyConfig, IdempotencyMiddleware};
use actix_web::{test, web, App, HttpResponse};
use redis_utils::{KvStore, RedisPool};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

async fn kv() -> KvStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    let pool = RedisPool::connect(&url).await.expect("connect to redis");
    KvStore::new(pool.manager())
}

fn unique_key() -> String {
    format!("test-key-{}", Uuid::new_v4())
}

#[ignore = "Requires Redis"]
#[actix_web::test]
async fn test_second_request_is_replayed_from_cache() {
    let kv = kv().await;
    let executions = Arc::new(AtomicU32::new(0));
    let executions_clone = executions.clone();

    let app = test::init_service(
        App::new()
            .wrap(IdempotencyMiddleware::new(
                kv.clone(),
                IdempotencyConfig::new("test"),
            ))
            .route(
                "/orders",
                web::post().to(move || {
                    let n = executions_clone.fetch_add(1, Ordering::SeqCst);
                    async move {
                        HttpResponse::Created()
                            .json(serde_json::json!({"execution": n, "status": "confirmed"}))
                    }
                }),
            ),
    )
    .await;

    let key = unique_key();

    let first = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/orders")
            .insert_header(("Idempotency-Key", key.clone()))
            .set_json(serde_json::json!({}))
            .to_request(),
    )
    .await;
    assert_eq!(first.status().as_u16(), 201);
    assert!(first.headers().get("x-idempotency-replayed").is_none());
    let first_body: serde_json::Value = test::read_body_json(first).await;

    let second = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/orders")
            .insert_header(("Idempotency-Key", key.clone()))
            .set_json(serde_json::json!({}))
            .to_request(),
    )
    .await;
    assert_eq!(second.status().as_u16(), 201);
    assert_eq!(
        second.headers().get("x-idempotency-replayed").unwrap(),
        "true"
    );
    let second_body: serde_json::Value = test::read_body_json(second).await;

    // Identical body, and the handler ran exactly once.
    assert_eq!(first_body, second_body);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[ignore = "Requires Redis"]
#[actix_web::test]
async fn test_in_flight_duplicate_gets_conflict() {
    let kv = kv().await;
    let key = unique_key();

    // Simulate another replica holding the single-flight lock.
    kv.set_if_absent(&format!("idempotency_lock:test:{}", key), "1", 30)
        .await
        .expect("acquire lock");

    let app = test::init_service(
        App::new()
            .wrap(IdempotencyMiddleware::new(
                kv.clone(),
                IdempotencyConfig::new("test"),
            ))
            .route(
                "/orders",
                web::post().to(|| async { HttpResponse::Created().json(serde_json::json!({})) }),
            ),
    )
    .await;

    let res = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/orders")
            .insert_header(("Idempotency-Key", key.clone()))
            .set_json(serde_json::json!({}))
            .to_request(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 409);
    assert_eq!(res.headers().get("Retry-After").unwrap(), "2");

    kv.delete(&format!("idempotency_lock:test:{}", key)).await.ok();
}

#[ignore = "Requires Redis"]
#[actix_web::test]
async fn test_non_2xx_is_not_cached() {
    let kv = kv().await;
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let app = test::init_service(
        App::new()
            .wrap(IdempotencyMiddleware::new(
                kv.clone(),
                IdempotencyConfig::new("test"),
            ))
            .route(
                "/orders",
                web::post().to(move || {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    async {
                        HttpResponse::ServiceUnavailable().json(serde_json::json!({"err": true}))
                    }
                }),
            ),
    )
    .await;

    let key = unique_key();
    for _ in 0..2 {
        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/orders")
                .insert_header(("Idempotency-Key", key.clone()))
                .set_json(serde_json::json!({}))
                .to_request(),
        )
        .await;
        assert_eq!(res.status().as_u16(), 503);
    }

    // Failures are retried for real, never replayed.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[ignore = "Requires Redis"]
#[actix_web::test]
async fn test_requests_without_key_pass_through() {
    let kv = kv().await;
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let app = test::init_service(
        App::new()
            .wrap(IdempotencyMiddleware::new(
                kv.clone(),
                IdempotencyConfig::new("test"),
            ))
            .route(
                "/orders",
                web::post().to(move || {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    async { HttpResponse::Ok().json(serde_json::json!({})) }
                }),
            ),
    )
    .await;

    for _ in 0..2 {
        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/orders")
                .set_json(serde_json::json!({}))
                .to_request(),
        )
        .await;
        assert_eq!(res.status().as_u16(), 200);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
