//! Stream consumer side effect: record the notification.

use crate::event_log::EventLog;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use stream_consumer::{EventHandler, StreamEvent};
use tracing::info;

pub struct NotificationHandler {
    event_log: Arc<Mutex<EventLog>>,
}

impl NotificationHandler {
    pub fn new(event_log: Arc<Mutex<EventLog>>) -> Self {
        Self { event_log }
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, event: &StreamEvent) -> anyhow::Result<()> {
        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "Notification sent"
        );
        self.event_log.lock().push(serde_json::json!({
            "event_id": event.event_id,
            "event_type": event.event_type,
            "aggregate_id": event.aggregate_id,
            "payload": event.payload,
            "processed_at": chrono::Utc::now().to_rfc3339(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_records_event() {
        let log = Arc::new(Mutex::new(EventLog::new(10)));
        let handler = NotificationHandler::new(log.clone());

        let event = StreamEvent {
            event_id: "order_created:abc".into(),
            event_type: "order_created".into(),
            aggregate_id: "abc".into(),
            payload: serde_json::json!({"total": "20.00"}),
            entry_id: "1-0".into(),
        };
        handler.handle(&event).await.unwrap();

        let entries = log.lock().tail(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["event_id"], "order_created:abc");
    }
}
