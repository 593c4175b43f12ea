//! Inventory service
//!
//! Stock reservation against PostgreSQL with row-level locking, duplicate
//! reservation collapse on (idempotency key, product), and chaos knobs for
//! simulated lock contention and error injection.

pub mod chaos;
pub mod config;
pub mod handlers;
pub mod models;
pub mod repository;
