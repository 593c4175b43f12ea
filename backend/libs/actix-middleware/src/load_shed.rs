//! Backpressure / load-shedding middleware
//!
//! Admission control at the gateway boundary: track requests currently inside
//! the handler chain and shed with HTTP 429 + `Retry-After` once the count
//! reaches `max_inflight`. Health, readiness and the metrics scrape path are
//! exempt so probes keep working under overload.

use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error, ResponseError,
};
use error_handling::ServiceError;
use futures::future::{ready, Ready};
use observability::metrics::LOAD_SHED_TOTAL;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use tracing::warn;

/// Construct once and `.wrap()` a clone per App so the inflight counter is
/// shared across all server workers; building it inside the app factory
/// would give each worker its own budget.
#[derive(Clone)]
pub struct LoadShedMiddleware {
    service_name: String,
    max_inflight: usize,
    inflight: Arc<Mutex<usize>>,
    skip_paths: HashSet<String>,
}

impl LoadShedMiddleware {
    pub fn new(service_name: &str, max_inflight: usize) -> Self {
        Self {
            service_name: service_name.to_string(),
            max_inflight,
            inflight: Arc::new(Mutex::new(0)),
            skip_paths: crate::default_skip_paths(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for LoadShedMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = LoadShedMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(LoadShedMiddlewareService {
            service: Rc::new(service),
            service_name: Rc::new(self.service_name.clone()),
            max_inflight: self.max_inflight,
            inflight: self.inflight.clone(),
            skip_paths: Rc::new(self.skip_paths.clone()),
        }))
    }
}

pub struct LoadShedMiddlewareService<S> {
    service: Rc<S>,
    service_name: Rc<String>,
    max_inflight: usize,
    inflight: Arc<Mutex<usize>>,
    skip_paths: Rc<HashSet<String>>,
}

/// Decrements the inflight counter on every exit path.
struct InflightGuard(Arc<Mutex<usize>>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut count = self.0.lock();
        *count = count.saturating_sub(1);
    }
}

impl<S, B> Service<ServiceRequest> for LoadShedMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let service_name = self.service_name.clone();
        let inflight = self.inflight.clone();
        let max_inflight = self.max_inflight;
        let exempt = self.skip_paths.contains(req.path());

        Box::pin(async move {
            if exempt {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let guard = {
                let mut count = inflight.lock();
                if *count >= max_inflight {
                    LOAD_SHED_TOTAL.with_label_values(&[&service_name]).inc();
                    warn!(
                        inflight = *count,
                        max = max_inflight,
                        path = req.path(),
                        "Load shed"
                    );
                    drop(count);
                    let (http_req, _payload) = req.into_parts();
                    let response = ServiceError::Overloaded.error_response();
                    return Ok(ServiceResponse::new(http_req, response).map_into_right_body());
                }
                *count += 1;
                InflightGuard(inflight.clone())
            };

            let res = service.call(req).await;
            drop(guard);
            Ok(res?.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};
    use std::time::Duration;

    async fn slow_handler() -> HttpResponse {
        tokio::time::sleep(Duration::from_millis(200)).await;
        HttpResponse::Ok().finish()
    }

    #[actix_web::test]
    async fn test_sheds_above_max_inflight() {
        let app = test::init_service(
            App::new()
                .wrap(LoadShedMiddleware::new("gateway", 2))
                .route("/orders", web::post().to(slow_handler)),
        )
        .await;

        let (r1, r2, r3) = tokio::join!(
            test::call_service(&app, test::TestRequest::post().uri("/orders").to_request()),
            test::call_service(&app, test::TestRequest::post().uri("/orders").to_request()),
            test::call_service(&app, test::TestRequest::post().uri("/orders").to_request()),
        );

        let statuses: Vec<u16> = [&r1, &r2, &r3].iter().map(|r| r.status().as_u16()).collect();
        let shed = statuses.iter().filter(|&&s| s == 429).count();
        let admitted = statuses.iter().filter(|&&s| s == 200).count();
        assert_eq!(shed, 1, "exactly one request is shed: {:?}", statuses);
        assert_eq!(admitted, 2);

        let rejected = [r1, r2, r3]
            .into_iter()
            .find(|r| r.status().as_u16() == 429)
            .unwrap();
        assert_eq!(rejected.headers().get("Retry-After").unwrap(), "5");
    }

    #[actix_web::test]
    async fn test_counter_released_after_completion() {
        let app = test::init_service(
            App::new()
                .wrap(LoadShedMiddleware::new("gateway", 1))
                .route(
                    "/orders",
                    web::post().to(|| async { HttpResponse::Ok().finish() }),
                ),
        )
        .await;

        // Sequential requests always fit in a capacity of one
        for _ in 0..3 {
            let res =
                test::call_service(&app, test::TestRequest::post().uri("/orders").to_request())
                    .await;
            assert_eq!(res.status().as_u16(), 200);
        }
    }

    #[actix_web::test]
    async fn test_health_path_exempt() {
        let app = test::init_service(
            App::new()
                .wrap(LoadShedMiddleware::new("gateway", 0))
                .route("/health", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        // max_inflight of zero sheds everything except exempt paths
        let res = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(res.status().as_u16(), 200);
    }
}
