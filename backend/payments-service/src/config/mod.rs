use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Baseline injected latency when no chaos override is set
    pub fault_latency_ms: f64,
    /// Baseline injected error rate (0.0 - 1.0)
    pub fault_error_rate: f64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8002),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            fault_latency_ms: std::env::var("PAYMENT_LATENCY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100.0),
            fault_error_rate: std::env::var("PAYMENT_ERROR_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
        }
    }
}
