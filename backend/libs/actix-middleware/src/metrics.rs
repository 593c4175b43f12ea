//! HTTP metrics middleware
//!
//! Emits `http_requests_total` and `request_duration_seconds` per request,
//! labeled with the matched route pattern (not the raw path) to keep metric
//! cardinality bounded. The scrape path itself is not tracked.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, Ready};
use observability::metrics::{HTTP_REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Instant;

pub struct MetricsMiddleware {
    service_name: String,
}

impl MetricsMiddleware {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = MetricsMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
            service_name: Rc::new(self.service_name.clone()),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
    service_name: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let service_name = self.service_name.clone();
        let start = Instant::now();
        let method = req.method().to_string();

        Box::pin(async move {
            let res = service.call(req).await?;

            let route = res
                .request()
                .match_pattern()
                .unwrap_or_else(|| res.request().path().to_string());
            if route != "/metrics" {
                let status = res.status().as_u16().to_string();
                HTTP_REQUESTS_TOTAL
                    .with_label_values(&[&service_name, &route, &method, &status])
                    .inc();
                REQUEST_DURATION_SECONDS
                    .with_label_values(&[&service_name, &route, &method])
                    .observe(start.elapsed().as_secs_f64());
            }

            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    #[actix_web::test]
    async fn test_counts_request_with_route_pattern() {
        let app = test::init_service(
            App::new().wrap(MetricsMiddleware::new("test-svc")).route(
                "/orders/{id}",
                web::get().to(|| async { HttpResponse::Ok().finish() }),
            ),
        )
        .await;

        let before = HTTP_REQUESTS_TOTAL
            .with_label_values(&["test-svc", "/orders/{id}", "GET", "200"])
            .get();

        let req = test::TestRequest::get().uri("/orders/abc").to_request();
        test::call_service(&app, req).await;

        let after = HTTP_REQUESTS_TOTAL
            .with_label_values(&["test-svc", "/orders/{id}", "GET", "200"])
            .get();
        assert_eq!(after, before + 1);
    }
}
