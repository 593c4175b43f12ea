use serde::{Deserialize, Serialize};

pub const EVENT_STREAM: &str = "notifications:events";
pub const CONSUMER_GROUP: &str = "notifications-group";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8004),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }
}
