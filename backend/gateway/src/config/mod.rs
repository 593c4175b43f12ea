use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub orders_url: String,
    /// Concurrent requests admitted before shedding
    pub max_inflight: usize,
    /// Overall deadline assigned to every inbound request, in seconds
    pub request_deadline_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            orders_url: std::env::var("ORDERS_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            max_inflight: std::env::var("MAX_INFLIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
            request_deadline_secs: std::env::var("REQUEST_DEADLINE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25),
        }
    }
}
