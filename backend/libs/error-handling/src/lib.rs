//! Unified error handling for Meridian services
//!
//! Provides the error taxonomy callers distinguish across the fleet, plus
//! consistent HTTP response formatting. Barrier rejections (breaker open,
//! bulkhead full, shed) carry a retry hint so clients can back off.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard error response body for all services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub code: String,
    pub timestamp: String,
}

/// Service-level error type
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Duplicate request in-flight")]
    IdempotencyInFlight,

    #[error("Too many requests - server overloaded")]
    Overloaded,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("Circuit breaker open for {downstream}")]
    BreakerOpen { downstream: String, retry_after_secs: u64 },

    #[error("Bulkhead full for {downstream}")]
    BulkheadFull { downstream: String },

    #[error("Downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::IdempotencyInFlight => 409,
            ServiceError::Overloaded => 429,
            ServiceError::DeadlineExceeded => 504,
            ServiceError::BreakerOpen { .. } => 503,
            ServiceError::BulkheadFull { .. } => 503,
            ServiceError::DownstreamUnavailable(_) => 502,
            ServiceError::Unavailable(_) => 503,
            ServiceError::Database(_) | ServiceError::Internal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::IdempotencyInFlight => "IDEMPOTENCY_CONFLICT",
            ServiceError::Overloaded => "LOAD_SHED",
            ServiceError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ServiceError::BreakerOpen { .. } => "BREAKER_OPEN",
            ServiceError::BulkheadFull { .. } => "BULKHEAD_FULL",
            ServiceError::DownstreamUnavailable(_) => "DOWNSTREAM_UNAVAILABLE",
            ServiceError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            ServiceError::Database(_) => "DATABASE_ERROR",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Seconds the client should wait before retrying, when we can say.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ServiceError::IdempotencyInFlight => Some(2),
            ServiceError::Overloaded => Some(5),
            ServiceError::BreakerOpen { retry_after_secs, .. } => Some(*retry_after_secs),
            ServiceError::BulkheadFull { .. } => Some(2),
            _ => None,
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            message: self.to_string(),
            status: self.status_code(),
            code: self.error_code().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(ServiceError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(ResponseError::status_code(self));
        if let Some(secs) = self.retry_after_secs() {
            builder.insert_header(("Retry-After", secs.to_string()));
        }
        builder.json(self.to_response_body())
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServiceError::NotFound("Resource not found".to_string()),
            _ => ServiceError::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ServiceError::Validation("bad".into()).status_code(), 400);
        assert_eq!(ServiceError::NotFound("order".into()).status_code(), 404);
        assert_eq!(ServiceError::IdempotencyInFlight.status_code(), 409);
        assert_eq!(ServiceError::Overloaded.status_code(), 429);
        assert_eq!(ServiceError::DeadlineExceeded.status_code(), 504);
        assert_eq!(
            ServiceError::BreakerOpen { downstream: "payments".into(), retry_after_secs: 30 }
                .status_code(),
            503
        );
    }

    #[test]
    fn test_retry_hints() {
        assert_eq!(ServiceError::Overloaded.retry_after_secs(), Some(5));
        assert_eq!(ServiceError::IdempotencyInFlight.retry_after_secs(), Some(2));
        assert_eq!(ServiceError::Validation("x".into()).retry_after_secs(), None);
    }

    #[test]
    fn test_error_response_format() {
        let err = ServiceError::NotFound("Order".to_string());
        let body = err.to_response_body();
        assert_eq!(body.status, 404);
        assert_eq!(body.code, "NOT_FOUND");
    }
}
