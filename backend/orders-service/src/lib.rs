//! Orders service
//!
//! The orchestrating aggregate of the commerce backbone. Order creation
//! writes the pending order and its `order_created` event in one
//! transaction, fans out to payments and inventory concurrently through
//! bulkhead, breaker and retry, folds the pair of outcomes into a terminal
//! status, and records that decision durably with an `order_status_updated`
//! event. The outbox publisher runs alongside the HTTP server and delivers
//! both events to notifications at-least-once.

pub mod config;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod services;
