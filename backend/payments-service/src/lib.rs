//! Payments service
//!
//! Simulates an external payment processor for the resilience testbed:
//! configurable latency and error injection (chaos knobs stored in the KV so
//! they can be toggled at runtime), idempotent charges, Prometheus metrics.

pub mod chaos;
pub mod config;
pub mod handlers;
