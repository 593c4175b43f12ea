//! Runtime fault-injection knobs.
//!
//! Latency and error rate live in the KV under `chaos:payments:*` so the
//! chaos scripts can flip them without restarting the service; environment
//! values are the fallback when no override is set or the KV is unreachable.

use rand::Rng;
use redis_utils::KvStore;
use std::time::Duration;

pub const LATENCY_KEY: &str = "chaos:payments:latency_ms";
pub const ERROR_RATE_KEY: &str = "chaos:payments:error_rate";

#[derive(Debug, Clone, Copy)]
pub struct FaultConfig {
    pub latency_ms: f64,
    pub error_rate: f64,
}

/// Read the current fault configuration, preferring KV overrides.
pub async fn current_faults(kv: &KvStore, defaults: FaultConfig) -> FaultConfig {
    let latency_ms = match kv.get(LATENCY_KEY).await {
        Ok(Some(raw)) => raw.parse().unwrap_or(defaults.latency_ms),
        _ => defaults.latency_ms,
    };
    let error_rate = match kv.get(ERROR_RATE_KEY).await {
        Ok(Some(raw)) => raw.parse().unwrap_or(defaults.error_rate),
        _ => defaults.error_rate,
    };
    FaultConfig {
        latency_ms,
        error_rate,
    }
}

/// Sleep for the configured latency with ±20% jitter.
pub async fn inject_latency(latency_ms: f64) {
    if latency_ms <= 0.0 {
        return;
    }
    let jitter = latency_ms * 0.2;
    let actual = latency_ms + rand::thread_rng().gen_range(-jitter..=jitter);
    tokio::time::sleep(Duration::from_secs_f64(actual.max(0.0) / 1000.0)).await;
}

/// Roll the dice against the configured error rate.
pub fn should_fail(error_rate: f64) -> bool {
    error_rate > 0.0 && rand::thread_rng().gen::<f64>() < error_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_never_fails() {
        for _ in 0..100 {
            assert!(!should_fail(0.0));
        }
    }

    #[test]
    fn test_full_rate_always_fails() {
        for _ in 0..100 {
            assert!(should_fail(1.0));
        }
    }
}
