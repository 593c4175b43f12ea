//! Resilience patterns for the Meridian services
//!
//! - **Retry**: exponential backoff with full jitter, a strict retryable-error
//!   classifier, and a shared per-request retry budget
//! - **Circuit breaker**: rolling failure window with a
//!   Closed/Open/HalfOpen state machine, per downstream
//! - **Bulkhead**: bounded concurrency per downstream with bounded admission
//!   wait; rejects rather than queues
//! - **Deadline**: absolute wall-clock deadline carried end-to-end in the
//!   `X-Request-Deadline` header, capping every per-hop timeout
//!
//! The pieces compose outer-to-inner as bulkhead → breaker → retry → HTTP
//! client, all speaking [`CallError`] so the classifier can tell transient
//! failures from ones that must surface immediately.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod deadline;
pub mod error;
pub mod retry;

pub use bulkhead::Bulkhead;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use deadline::{Deadline, TimeoutConfig, DEADLINE_HEADER};
pub use error::CallError;
pub use retry::{retry_with_backoff, RetryBudget, RetryConfig};
