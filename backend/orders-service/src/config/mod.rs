use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub payments_url: String,
    pub inventory_url: String,
    pub notifications_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8001),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            payments_url: std::env::var("PAYMENTS_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            inventory_url: std::env::var("INVENTORY_URL")
                .unwrap_or_else(|_| "http://localhost:8003".to_string()),
            notifications_url: std::env::var("NOTIFICATIONS_URL")
                .unwrap_or_else(|_| "http://localhost:8004".to_string()),
        }
    }
}
