//! Idempotency middleware
//!
//! Collapses duplicate mutating requests (POST/PUT/PATCH carrying an
//! `Idempotency-Key` header) via two mechanisms:
//!
//! 1. A response cache: the first 2xx completion is snapshotted into the KV
//!    and replayed verbatim for the same key, flagged with
//!    `X-Idempotency-Replayed: true`.
//! 2. A single-flight lock (SET NX + TTL): a concurrent duplicate that races
//!    the first request gets 409 with a retry hint instead of a second
//!    execution.
//!
//! If the KV is unavailable the middleware fails open and lets requests
//! through: the durable uniqueness constraint in the aggregate store is the
//! last line of defense, and a duplicate-but-safe write beats unavailability.

use actix_web::{
    body::{to_bytes, BoxBody, EitherBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        header::{HeaderName, HeaderValue},
        Method, StatusCode,
    },
    Error, HttpRequest, HttpResponse, ResponseError,
};
use error_handling::ServiceError;
use futures::future::{ready, Ready};
use observability::metrics::{IDEMPOTENCY_CONFLICTS_TOTAL, IDEMPOTENCY_HITS_TOTAL};
use redis_utils::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use tracing::{info, warn};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const REPLAYED_HEADER: &str = "x-idempotency-replayed";

const MAX_KEY_BYTES: usize = 256;

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub service_name: String,
    /// TTL for cached responses; long enough to cover any client retry window
    pub cache_ttl_secs: u64,
    /// TTL for the single-flight lock; expected max processing time
    pub lock_ttl_secs: u64,
    pub skip_paths: HashSet<String>,
}

impl IdempotencyConfig {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            cache_ttl_secs: 86_400,
            lock_ttl_secs: 30,
            skip_paths: crate::default_skip_paths(),
        }
    }
}

/// Response snapshot stored in the KV.
#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    status_code: u16,
    body: serde_json::Value,
}

pub struct IdempotencyMiddleware {
    kv: KvStore,
    config: IdempotencyConfig,
}

impl IdempotencyMiddleware {
    pub fn new(kv: KvStore, config: IdempotencyConfig) -> Self {
        Self { kv, config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdempotencyMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = IdempotencyMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdempotencyMiddlewareService {
            service: Rc::new(service),
            kv: self.kv.clone(),
            config: Rc::new(self.config.clone()),
        }))
    }
}

pub struct IdempotencyMiddlewareService<S> {
    service: Rc<S>,
    kv: KvStore,
    config: Rc<IdempotencyConfig>,
}

// Keys are namespaced per service: the same client key replays a payments
// charge and an inventory reservation independently.
fn cache_key(service: &str, key: &str) -> String {
    format!("idempotency:{}:{}", service, key)
}

fn lock_key(service: &str, key: &str) -> String {
    format!("idempotency_lock:{}:{}", service, key)
}

fn synthesized<B>(req: HttpRequest, response: HttpResponse<BoxBody>) -> ServiceResponse<EitherBody<B>>
where
    B: MessageBody + 'static,
{
    ServiceResponse::new(req, response).map_into_right_body()
}

impl<S, B> Service<ServiceRequest> for IdempotencyMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let kv = self.kv.clone();
        let config = self.config.clone();

        let method = req.method();
        let mutating = method == Method::POST || method == Method::PUT || method == Method::PATCH;
        let skipped = config.skip_paths.contains(req.path());
        let idempotency_key = req
            .headers()
            .get(IDEMPOTENCY_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        Box::pin(async move {
            let key = match idempotency_key {
                Some(key) if mutating && !skipped => key,
                _ => {
                    let res = service.call(req).await?;
                    return Ok(res.map_into_left_body());
                }
            };

            if key.is_empty() || key.len() > MAX_KEY_BYTES {
                let (http_req, _) = req.into_parts();
                let response =
                    ServiceError::Validation(format!("Idempotency-Key must be 1..={MAX_KEY_BYTES} bytes"))
                        .error_response();
                return Ok(synthesized(http_req, response));
            }

            // 1. Replay a cached response when present. KV errors fail open.
            match kv.get(&cache_key(&config.service_name, &key)).await {
                Ok(Some(raw)) => {
                    if let Ok(cached) = serde_json::from_str::<CachedResponse>(&raw) {
                        IDEMPOTENCY_HITS_TOTAL
                            .with_label_values(&[&config.service_name])
                            .inc();
                        info!(idempotency_key = %key, "Idempotency cache hit");
                        let mut response = HttpResponse::build(
                            StatusCode::from_u16(cached.status_code)
                                .unwrap_or(StatusCode::OK),
                        )
                        .json(cached.body);
                        response.headers_mut().insert(
                            HeaderName::from_static(REPLAYED_HEADER),
                            HeaderValue::from_static("true"),
                        );
                        let (http_req, _) = req.into_parts();
                        return Ok(synthesized(http_req, response));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Idempotency store read failed - failing open");
                }
            }

            // 2. Single-flight lock for concurrent duplicates. Lock errors
            // fail open (treated as acquired).
            let locked = match kv
                .set_if_absent(&lock_key(&config.service_name, &key), "1", config.lock_ttl_secs)
                .await
            {
                Ok(acquired) => {
                    if !acquired {
                        IDEMPOTENCY_CONFLICTS_TOTAL
                            .with_label_values(&[&config.service_name])
                            .inc();
                        let (http_req, _) = req.into_parts();
                        let response = ServiceError::IdempotencyInFlight.error_response();
                        return Ok(synthesized(http_req, response));
                    }
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Idempotency lock failed - failing open");
                    false
                }
            };

            // 3. Execute the handler, releasing the lock on every exit path.
            let result = service.call(req).await;
            let res = match result {
                Ok(res) => res,
                Err(e) => {
                    if locked {
                        let _ = kv.delete(&lock_key(&config.service_name, &key)).await;
                    }
                    return Err(e);
                }
            };

            // 4. Cache only successful (2xx) responses so clients may
            // legitimately retry failures.
            if !res.status().is_success() {
                if locked {
                    let _ = kv.delete(&lock_key(&config.service_name, &key)).await;
                }
                return Ok(res.map_into_left_body());
            }

            let status = res.status();
            let (http_req, http_res) = res.into_parts();
            let (head, body) = http_res.into_parts();
            let bytes = match to_bytes(body).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    if locked {
                        let _ = kv.delete(&lock_key(&config.service_name, &key)).await;
                    }
                    let err: Box<dyn std::error::Error> = err.into();
                    return Err(actix_web::error::ErrorInternalServerError(format!(
                        "failed to buffer response body: {}",
                        err
                    )));
                }
            };

            let body_json: serde_json::Value = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
                });
            let snapshot = CachedResponse {
                status_code: status.as_u16(),
                body: body_json,
            };
            match serde_json::to_string(&snapshot) {
                Ok(serialized) => {
                    if let Err(e) = kv
                        .set_with_ttl(&cache_key(&config.service_name, &key), &serialized, config.cache_ttl_secs)
                        .await
                    {
                        warn!(error = %e, "Idempotency store write failed");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize idempotent response"),
            }

            if locked {
                let _ = kv.delete(&lock_key(&config.service_name, &key)).await;
            }

            let restored = head.set_body(bytes).map_into_boxed_body();
            Ok(synthesized(http_req, restored))
        })
    }
}
