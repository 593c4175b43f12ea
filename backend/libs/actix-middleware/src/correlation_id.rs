//! Request correlation ID middleware
//!
//! Extracts or generates a unique correlation ID per request and propagates
//! it on the response. Handlers read it from request extensions to forward it
//! verbatim on downstream calls and to tie log records together.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Correlation id stored in request extensions.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

#[derive(Clone, Default)]
pub struct CorrelationIdMiddleware;

impl<S, B> Transform<S, ServiceRequest> for CorrelationIdMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = CorrelationIdMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CorrelationIdMiddlewareService { service }))
    }
}

pub struct CorrelationIdMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for CorrelationIdMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        req.extensions_mut()
            .insert(CorrelationId(correlation_id.clone()));

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut res = fut.await?;
            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                res.headers_mut()
                    .insert(HeaderName::from_static(CORRELATION_HEADER), value);
            }
            Ok(res)
        })
    }
}

/// Read the correlation id stamped by the middleware.
pub fn get_correlation_id(req: &actix_web::HttpRequest) -> String {
    req.extensions()
        .get::<CorrelationId>()
        .map(|c| c.0.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpRequest, HttpResponse};

    async fn echo_correlation(req: HttpRequest) -> HttpResponse {
        HttpResponse::Ok().body(get_correlation_id(&req))
    }

    #[actix_web::test]
    async fn test_propagates_inbound_header_verbatim() {
        let app = test::init_service(
            App::new()
                .wrap(CorrelationIdMiddleware)
                .route("/", web::get().to(echo_correlation)),
        )
        .await;

        let req = test::TestRequest::get()
            .insert_header(("X-Correlation-ID", "corr-123"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.headers().get(CORRELATION_HEADER).unwrap(), "corr-123");
        let body = test::read_body(res).await;
        assert_eq!(body, "corr-123");
    }

    #[actix_web::test]
    async fn test_generates_id_when_absent() {
        let app = test::init_service(
            App::new()
                .wrap(CorrelationIdMiddleware)
                .route("/", web::get().to(echo_correlation)),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().to_request()).await;
        let header = res.headers().get(CORRELATION_HEADER).unwrap();
        // UUID v4 string
        assert_eq!(header.to_str().unwrap().len(), 36);
    }
}
