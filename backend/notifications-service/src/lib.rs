//! Notifications service
//!
//! Terminal consumer of order events. Events arrive two ways: POSTed to
//! `/events` by the orders outbox publisher, and through the
//! `notifications:events` stream consumer group. Both paths share one dedup
//! set keyed by `{event_type}:{aggregate_id}`, so at-least-once delivery
//! upstream collapses to one notification side effect here.

pub mod config;
pub mod consumer;
pub mod event_log;
pub mod handlers;

pub use event_log::EventLog;
