//! Redis connection management and the KV/stream contract used by the
//! resilience layers (idempotency cache, single-flight locks, breaker state,
//! chaos knobs) and the notifications event stream.
//!
//! Every command is wrapped in a hard timeout so a wedged Redis cannot stall
//! a request handler; callers decide whether to fail open on error.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Redis connection pool.
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to construct Redis client")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;
        info!("Redis connection manager initialized");
        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

const DEFAULT_REDIS_COMMAND_TIMEOUT_MS: u64 = 3_000;
const MIN_REDIS_COMMAND_TIMEOUT_MS: u64 = 500;

fn redis_command_timeout() -> Duration {
    static TIMEOUT: OnceCell<Duration> = OnceCell::new();
    *TIMEOUT.get_or_init(|| {
        let ms = std::env::var("REDIS_COMMAND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REDIS_COMMAND_TIMEOUT_MS)
            .max(MIN_REDIS_COMMAND_TIMEOUT_MS);
        Duration::from_millis(ms)
    })
}

/// Wrap a Redis command future with timeout protection.
pub async fn with_timeout<F, T>(future: F) -> Result<T, RedisError>
where
    F: std::future::Future<Output = Result<T, RedisError>>,
{
    match timeout(redis_command_timeout(), future).await {
        Ok(res) => res,
        Err(_) => {
            error!("Redis command timed out after {:?}", redis_command_timeout());
            Err(RedisError::from((
                redis::ErrorKind::IoError,
                "redis command timed out",
            )))
        }
    }
}

/// A message delivered from a stream consumer group.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Broker-assigned entry id
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// KV and stream operations the services consume.
///
/// Thin facade over the connection manager; each call takes the manager lock
/// only for the duration of one command.
#[derive(Clone)]
pub struct KvStore {
    manager: SharedConnectionManager,
}

impl KvStore {
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self { manager }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.manager.lock().await;
        with_timeout(conn.get(key)).await
    }

    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), RedisError> {
        let mut conn = self.manager.lock().await;
        with_timeout(conn.set_ex(key, value, ttl_secs)).await
    }

    /// SET NX EX: returns true when the key was freshly set.
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, RedisError> {
        let mut conn = self.manager.lock().await;
        let reply: Option<String> = with_timeout(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut *conn),
        )
        .await?;
        Ok(reply.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.lock().await;
        with_timeout(conn.del(key)).await
    }

    /// XADD with an auto-generated entry id.
    pub async fn stream_append(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
    ) -> Result<String, RedisError> {
        let mut conn = self.manager.lock().await;
        with_timeout(conn.xadd(stream, "*", fields)).await
    }

    /// XGROUP CREATE ... MKSTREAM, tolerating an already-existing group.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.lock().await;
        let result: Result<String, RedisError> = with_timeout(
            redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(stream)
                .arg(group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut *conn),
        )
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream, group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// XREADGROUP for new (`>`) entries, blocking up to `block_ms`.
    pub async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>, RedisError> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = {
            let mut conn = self.manager.lock().await;
            // Block time exceeds the command timeout, so bound by block_ms + slack.
            match timeout(
                Duration::from_millis(block_ms + 2_000),
                conn.xread_options(&[stream], &[">"], &opts),
            )
            .await
            {
                Ok(res) => res?,
                Err(_) => {
                    return Err(RedisError::from((
                        redis::ErrorKind::IoError,
                        "redis stream read timed out",
                    )))
                }
            }
        };

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let mut fields = HashMap::new();
                for (name, value) in entry.map {
                    let text: String = redis::from_redis_value(&value).unwrap_or_default();
                    fields.insert(name, text);
                }
                messages.push(StreamMessage {
                    id: entry.id,
                    fields,
                });
            }
        }
        Ok(messages)
    }

    pub async fn stream_ack(
        &self,
        stream: &str,
        group: &str,
        entry_id: &str,
    ) -> Result<(), RedisError> {
        let mut conn = self.manager.lock().await;
        let _acked: i64 = with_timeout(conn.xack(stream, group, &[entry_id])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_timeout_floor() {
        // Even a misconfigured environment cannot push the timeout below 500ms.
        assert!(redis_command_timeout() >= Duration::from_millis(MIN_REDIS_COMMAND_TIMEOUT_MS));
    }

    #[tokio::test]
    #[ignore = "Requires Redis at REDIS_URL"]
    async fn test_set_if_absent_roundtrip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        let pool = RedisPool::connect(&url).await.expect("connect");
        let kv = KvStore::new(pool.manager());

        let key = format!("test:lock:{}", std::process::id());
        kv.delete(&key).await.expect("cleanup");

        assert!(kv.set_if_absent(&key, "1", 30).await.expect("first set"));
        assert!(!kv.set_if_absent(&key, "1", 30).await.expect("second set"));

        kv.delete(&key).await.expect("cleanup");
    }
}
