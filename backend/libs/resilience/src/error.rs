//! Error taxonomy for downstream calls.
//!
//! Everything that travels through the bulkhead/breaker/retry stack is a
//! `CallError`, so each layer can decide from the variant alone whether to
//! retry, count a breaker failure, or surface immediately.

use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// Connect/read/abort failures at the transport level
    #[error("transport error: {0}")]
    Transport(String),

    /// Per-hop timeout elapsed
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Downstream answered with a non-2xx status
    #[error("downstream returned status {status}")]
    Status { status: u16, body: String },

    /// Short-circuited by an open breaker
    #[error("circuit breaker open for {downstream}")]
    BreakerOpen {
        downstream: String,
        retry_after_secs: u64,
    },

    /// Rejected by the bulkhead admission slot
    #[error("bulkhead full for {downstream}")]
    BulkheadFull { downstream: String },

    /// The absolute request deadline has passed
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl CallError {
    /// Whether the retry engine may schedule another attempt.
    ///
    /// Only transport failures and explicitly listed status codes qualify;
    /// anything else (validation, auth, barrier rejections, deadline) is
    /// surfaced immediately so retries never mask application errors.
    pub fn is_retryable(&self, retryable_status: &HashSet<u16>) -> bool {
        match self {
            CallError::Transport(_) | CallError::Timeout(_) => true,
            CallError::Status { status, .. } => retryable_status.contains(status),
            _ => false,
        }
    }

    /// Whether this failure counts against the circuit breaker window.
    ///
    /// Server-side trouble (network, timeouts, 5xx, 429) accumulates;
    /// validation 4xx passes through without recording.
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Transport(_) | CallError::Timeout(_) => true,
            CallError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Stable label for the `downstream_errors_total` metric.
    pub fn error_type(&self) -> &'static str {
        match self {
            CallError::Transport(_) => "transport",
            CallError::Timeout(_) => "timeout",
            CallError::Status { status, .. } if *status >= 500 => "http_5xx",
            CallError::Status { .. } => "http_4xx",
            CallError::BreakerOpen { .. } => "breaker_open",
            CallError::BulkheadFull { .. } => "bulkhead_full",
            CallError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CallError::Timeout(Duration::ZERO)
        } else {
            CallError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::default_retryable_status;

    #[test]
    fn test_classifier_retries_listed_statuses_only() {
        let retryable = default_retryable_status();
        for status in [429, 500, 502, 503, 504] {
            let err = CallError::Status {
                status,
                body: String::new(),
            };
            assert!(err.is_retryable(&retryable), "{status} should be retryable");
        }
        for status in [400, 401, 403, 404, 409, 422] {
            let err = CallError::Status {
                status,
                body: String::new(),
            };
            assert!(!err.is_retryable(&retryable), "{status} must surface");
        }
    }

    #[test]
    fn test_barrier_errors_never_retry() {
        let retryable = default_retryable_status();
        assert!(!CallError::BreakerOpen {
            downstream: "payments".into(),
            retry_after_secs: 30
        }
        .is_retryable(&retryable));
        assert!(!CallError::BulkheadFull {
            downstream: "payments".into()
        }
        .is_retryable(&retryable));
        assert!(!CallError::DeadlineExceeded.is_retryable(&retryable));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CallError::Transport("connection refused".into()).is_transient());
        assert!(CallError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!CallError::Status {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!CallError::DeadlineExceeded.is_transient());
    }
}
