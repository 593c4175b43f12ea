//! Runtime fault-injection knobs: simulated lock contention and error rate,
//! stored under `chaos:inventory:*` in the KV.

use rand::Rng;
use redis_utils::KvStore;
use std::time::Duration;

pub const LOCK_CONTENTION_KEY: &str = "chaos:inventory:lock_contention_ms";
pub const ERROR_RATE_KEY: &str = "chaos:inventory:error_rate";

#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    pub lock_contention_ms: f64,
    pub error_rate: f64,
}

pub async fn current_faults(kv: &KvStore) -> FaultConfig {
    let lock_contention_ms = match kv.get(LOCK_CONTENTION_KEY).await {
        Ok(Some(raw)) => raw.parse().unwrap_or(0.0),
        _ => 0.0,
    };
    let error_rate = match kv.get(ERROR_RATE_KEY).await {
        Ok(Some(raw)) => raw.parse().unwrap_or(0.0),
        _ => 0.0,
    };
    FaultConfig {
        lock_contention_ms,
        error_rate,
    }
}

/// Sleep for the configured contention delay with ±30% jitter.
pub async fn inject_lock_contention(contention_ms: f64) {
    if contention_ms <= 0.0 {
        return;
    }
    let jitter = contention_ms * 0.3;
    let actual = contention_ms + rand::thread_rng().gen_range(-jitter..=jitter);
    tokio::time::sleep(Duration::from_secs_f64(actual.max(0.0) / 1000.0)).await;
}

pub fn should_fail(error_rate: f64) -> bool {
    error_rate > 0.0 && rand::thread_rng().gen::<f64>() < error_rate
}
