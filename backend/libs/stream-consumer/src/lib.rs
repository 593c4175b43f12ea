//! Idempotent stream consumer
//!
//! Reads a named append-only stream through a consumer group and invokes a
//! handler exactly once per logical event id, acknowledging duplicates
//! without re-running the side effect.
//!
//! The outbox publisher upstream is at-least-once, so duplicates are a normal
//! condition here, not an error. Dedup state is an in-memory bounded set:
//! capacity plus TTL sized to cover the publisher's retry horizon. That is a
//! deliberate trade - events are replayable and the side effect (notify +
//! log) is naturally idempotent - documented so a future durable store can
//! replace it without changing the consumer contract.

use async_trait::async_trait;
use observability::metrics::DUPLICATE_WRITE_TOTAL;
use parking_lot::Mutex;
use redis_utils::{KvStore, StreamMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A logical event decoded from a stream entry.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Dedup identity: explicit `event_id` field, else `{event_type}:{aggregate_id}`
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    /// Broker-assigned entry id, used for acknowledgement
    pub entry_id: String,
}

impl StreamEvent {
    fn from_message(msg: StreamMessage) -> Self {
        let event_type = msg.fields.get("event_type").cloned().unwrap_or_default();
        let aggregate_id = msg.fields.get("aggregate_id").cloned().unwrap_or_default();
        let event_id = msg
            .fields
            .get("event_id")
            .cloned()
            .unwrap_or_else(|| format!("{}:{}", event_type, aggregate_id));
        let payload = msg
            .fields
            .get("payload")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(serde_json::Value::Null);
        Self {
            event_id,
            event_type,
            aggregate_id,
            payload,
            entry_id: msg.id,
        }
    }
}

/// Side effect invoked once per deduplicated event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &StreamEvent) -> anyhow::Result<()>;
}

/// Bounded set of processed event ids.
///
/// Eviction is oldest-first once over capacity; entries also age out after
/// the TTL. In steady state the horizon must cover the maximum redelivery
/// window of the outbox publisher.
pub struct ProcessedSet {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, Instant>,
    /// Insertion order for eviction; slots carry the insert time so a stale
    /// slot from a re-inserted id never evicts the fresh entry
    order: VecDeque<(String, Instant)>,
}

impl ProcessedSet {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&mut self, event_id: &str) -> bool {
        match self.entries.get(event_id) {
            Some(seen_at) if seen_at.elapsed() < self.ttl => true,
            Some(_) => {
                self.entries.remove(event_id);
                false
            }
            None => false,
        }
    }

    /// Record an event id; evicts the oldest entries beyond capacity.
    pub fn insert(&mut self, event_id: &str) {
        let now = Instant::now();
        self.entries.insert(event_id.to_string(), now);
        self.order.push_back((event_id.to_string(), now));
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some((oldest, queued_at)) => {
                    if self.entries.get(&oldest) == Some(&queued_at) {
                        self.entries.remove(&oldest);
                    }
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Consumer-group reader with per-event dedup.
pub struct StreamConsumer {
    kv: KvStore,
    service_name: String,
    stream: String,
    group: String,
    consumer_name: String,
    read_count: usize,
    block_ms: u64,
    processed: Arc<Mutex<ProcessedSet>>,
}

impl StreamConsumer {
    pub fn new(kv: KvStore, service_name: &str, stream: &str, group: &str) -> Self {
        Self {
            kv,
            service_name: service_name.to_string(),
            stream: stream.to_string(),
            group: group.to_string(),
            consumer_name: format!("consumer-{}", std::process::id()),
            read_count: 10,
            block_ms: 1_000,
            // Covers the publisher's retry horizon of 24h for the expected
            // event volume of this testbed.
            processed: Arc::new(Mutex::new(ProcessedSet::new(
                4096,
                Duration::from_secs(86_400),
            ))),
        }
    }

    /// Share a dedup set with another delivery path (e.g. the HTTP ingestion
    /// endpoint) so an event delivered both ways still runs its side effect
    /// only once.
    pub fn with_processed_set(mut self, processed: Arc<Mutex<ProcessedSet>>) -> Self {
        self.processed = processed;
        self
    }

    /// Run forever; spawn as a background task.
    pub async fn run(&self, handler: Arc<dyn EventHandler>) {
        info!(
            stream = %self.stream,
            group = %self.group,
            consumer = %self.consumer_name,
            "Stream consumer started"
        );

        loop {
            if let Err(e) = self.kv.ensure_group(&self.stream, &self.group).await {
                error!(error = %e, "Failed to ensure consumer group");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
            break;
        }

        loop {
            if let Err(e) = self.poll_once(handler.as_ref()).await {
                error!(error = %e, "Stream consumer poll failed");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }

    /// Read one batch and process each delivered entry.
    pub async fn poll_once(&self, handler: &dyn EventHandler) -> anyhow::Result<usize> {
        let messages = self
            .kv
            .stream_read_group(
                &self.stream,
                &self.group,
                &self.consumer_name,
                self.read_count,
                self.block_ms,
            )
            .await?;

        let mut handled = 0;
        for msg in messages {
            let event = StreamEvent::from_message(msg);

            if self.processed.lock().contains(&event.event_id) {
                DUPLICATE_WRITE_TOTAL
                    .with_label_values(&[&self.service_name, "consume_event"])
                    .inc();
                self.ack(&event).await;
                continue;
            }

            match handler.handle(&event).await {
                Ok(()) => {
                    self.processed.lock().insert(&event.event_id);
                    self.ack(&event).await;
                    handled += 1;
                }
                Err(e) => {
                    // Not acked: the broker keeps it pending for redelivery.
                    warn!(
                        event_id = %event.event_id,
                        error = %e,
                        "Event handler failed"
                    );
                }
            }
        }
        Ok(handled)
    }

    async fn ack(&self, event: &StreamEvent) {
        if let Err(e) = self
            .kv
            .stream_ack(&self.stream, &self.group, &event.entry_id)
            .await
        {
            warn!(entry_id = %event.entry_id, error = %e, "Failed to ack stream entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_set_dedups() {
        let mut set = ProcessedSet::new(10, Duration::from_secs(60));
        assert!(!set.contains("order_created:abc"));
        set.insert("order_created:abc");
        assert!(set.contains("order_created:abc"));
        assert!(!set.contains("order_created:def"));
    }

    #[test]
    fn test_processed_set_bounded_by_capacity() {
        let mut set = ProcessedSet::new(3, Duration::from_secs(60));
        for i in 0..5 {
            set.insert(&format!("event-{i}"));
        }
        assert_eq!(set.len(), 3);
        // Oldest entries were evicted
        assert!(!set.contains("event-0"));
        assert!(!set.contains("event-1"));
        assert!(set.contains("event-4"));
    }

    #[test]
    fn test_processed_set_entries_age_out() {
        let mut set = ProcessedSet::new(10, Duration::from_millis(10));
        set.insert("stale-event");
        std::thread::sleep(Duration::from_millis(20));
        assert!(!set.contains("stale-event"));
    }

    #[test]
    fn test_event_id_derived_from_type_and_aggregate() {
        let msg = StreamMessage {
            id: "1-0".into(),
            fields: HashMap::from([
                ("event_type".to_string(), "order_created".to_string()),
                ("aggregate_id".to_string(), "abc".to_string()),
                ("payload".to_string(), "{\"total\":\"20.00\"}".to_string()),
            ]),
        };
        let event = StreamEvent::from_message(msg);
        assert_eq!(event.event_id, "order_created:abc");
        assert_eq!(event.payload["total"], "20.00");
    }

    #[test]
    fn test_explicit_event_id_field_wins() {
        let msg = StreamMessage {
            id: "1-0".into(),
            fields: HashMap::from([
                ("event_id".to_string(), "explicit-id".to_string()),
                ("event_type".to_string(), "order_created".to_string()),
                ("aggregate_id".to_string(), "abc".to_string()),
            ]),
        };
        let event = StreamEvent::from_message(msg);
        assert_eq!(event.event_id, "explicit-id");
    }
}
