//! # Transactional Outbox
//!
//! Reliable event publishing for the Meridian services: a business change and
//! the event describing it are written in the *same* database transaction, so
//! an event exists if and only if the change committed. A background
//! processor later delivers pending events to the notifications endpoint and
//! flips them to published.
//!
//! Delivery is **at-least-once**: a crash between delivery and mark-published
//! redelivers on the next cycle, and consumers deduplicate (see the
//! `stream-consumer` crate). Multiple publisher replicas scale safely because
//! rows are claimed with `FOR UPDATE SKIP LOCKED` inside the batch
//! transaction; two workers never contend on the same row.
//!
//! ```rust,no_run
//! use transactional_outbox::{OutboxEvent, OutboxRepository, SqlxOutboxRepository};
//! use sqlx::PgPool;
//! use uuid::Uuid;
//!
//! async fn create_order(pool: &PgPool, repo: &SqlxOutboxRepository) -> anyhow::Result<()> {
//!     let order_id = Uuid::new_v4();
//!     let mut tx = pool.begin().await?;
//!
//!     sqlx::query("INSERT INTO orders (id, status) VALUES ($1, 'pending')")
//!         .bind(order_id)
//!         .execute(&mut *tx)
//!         .await?;
//!
//!     let event = OutboxEvent::new(
//!         "order",
//!         order_id,
//!         "order_created",
//!         serde_json::json!({ "order_id": order_id }),
//!     );
//!     repo.insert(&mut tx, &event).await?;
//!
//!     // Both the order and its event commit atomically.
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use observability::metrics::{OUTBOX_PENDING, OUTBOX_PUBLISHED_TOTAL};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod error;

pub use error::{OutboxError, OutboxResult};

/// An event row in the outbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    /// Aggregate kind the event belongs to (e.g. "order")
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// Event name consumers dispatch on (e.g. "order_created")
    pub event_type: String,
    /// Opaque payload delivered verbatim
    pub payload: serde_json::Value,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    /// Set exactly when `published` flips to true
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(
        aggregate_type: &str,
        aggregate_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            event_type: event_type.to_string(),
            payload,
            published: false,
            created_at: Utc::now(),
            published_at: None,
        }
    }
}

/// Repository for outbox events.
///
/// `insert` MUST be called inside the transaction that performs the business
/// write; that is the whole point of the pattern. `claim_batch` and
/// `mark_published` share the publisher's batch transaction so the row locks
/// taken by `SKIP LOCKED` hold until the batch commits.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> OutboxResult<()>;

    /// Append an event built from parts; same-transaction as the caller's
    /// business write.
    async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_type: &str,
        aggregate_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> OutboxResult<()> {
        self.insert(
            tx,
            &OutboxEvent::new(aggregate_type, aggregate_id, event_type, payload),
        )
        .await
    }

    /// Claim up to `limit` unpublished events, oldest first, skipping rows
    /// locked by other publisher replicas.
    async fn claim_batch(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        limit: i64,
    ) -> OutboxResult<Vec<OutboxEvent>>;

    /// Flip a claimed event to published.
    async fn mark_published(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
    ) -> OutboxResult<()>;

    async fn pending_count(&self) -> OutboxResult<i64>;
}

/// SQLx/PostgreSQL implementation of [`OutboxRepository`].
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> OutboxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, aggregate_type, aggregate_id, event_type, payload, published, created_at, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.published)
        .bind(event.created_at)
        .bind(event.published_at)
        .execute(&mut **tx)
        .await?;

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "Event inserted into outbox"
        );
        Ok(())
    }

    async fn claim_batch(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        limit: i64,
    ) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload,
                   published, created_at, published_at
            FROM outbox_events
            WHERE NOT published
            ORDER BY created_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        let events = rows
            .into_iter()
            .map(|row| {
                Ok(OutboxEvent {
                    id: row.try_get("id")?,
                    aggregate_type: row.try_get("aggregate_type")?,
                    aggregate_id: row.try_get("aggregate_id")?,
                    event_type: row.try_get("event_type")?,
                    payload: row.try_get("payload")?,
                    published: row.try_get("published")?,
                    created_at: row.try_get("created_at")?,
                    published_at: row.try_get("published_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(events)
    }

    async fn mark_published(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
    ) -> OutboxResult<()> {
        sqlx::query(
            "UPDATE outbox_events SET published = TRUE, published_at = NOW() WHERE id = $1",
        )
        .bind(event_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn pending_count(&self) -> OutboxResult<i64> {
        let row = sqlx::query("SELECT COUNT(*)::BIGINT AS pending FROM outbox_events WHERE NOT published")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("pending")?)
    }
}

/// Publisher for delivering events to the downstream ingestion endpoint.
///
/// Implementations should treat redelivery as normal: the downstream is
/// expected to be idempotent by event id.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()>;
}

/// Delivers events with a POST to the notifications `/events` endpoint.
pub struct HttpEventPublisher {
    client: reqwest::Client,
    events_url: String,
}

impl HttpEventPublisher {
    pub fn new(notifications_url: &str) -> OutboxResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| OutboxError::Other(e.into()))?;
        Ok(Self {
            client,
            events_url: format!("{}/events", notifications_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()> {
        let response = self
            .client
            .post(&self.events_url)
            .json(&serde_json::json!({
                "event_type": event.event_type,
                "aggregate_id": event.aggregate_id,
                "payload": event.payload,
            }))
            .send()
            .await
            .map_err(|e| OutboxError::PublishFailed(e.to_string()))?;

        let status = response.status().as_u16();
        if status < 300 {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Event delivered to notifications"
            );
            Ok(())
        } else {
            Err(OutboxError::PublishFailed(format!(
                "notifications answered {}",
                status
            )))
        }
    }
}

/// Background worker publishing pending outbox events.
///
/// One instance per service replica; replicas never fight over rows thanks to
/// `SKIP LOCKED`. Each cycle runs one transaction: claim a batch, attempt
/// delivery per event, flip the delivered ones, commit. Failed events stay
/// untouched and get reselected on the next iteration.
pub struct OutboxProcessor<R: OutboxRepository, P: EventPublisher> {
    pool: PgPool,
    repository: Arc<R>,
    publisher: Arc<P>,
    service_name: String,
    batch_size: i64,
    /// Sleep when a cycle finds nothing to publish
    idle_sleep: Duration,
    /// Sleep after an unexpected error
    error_sleep: Duration,
}

impl<R: OutboxRepository, P: EventPublisher> OutboxProcessor<R, P> {
    pub fn new(pool: PgPool, repository: Arc<R>, publisher: Arc<P>, service_name: &str) -> Self {
        Self {
            pool,
            repository,
            publisher,
            service_name: service_name.to_string(),
            batch_size: 50,
            idle_sleep: Duration::from_secs(1),
            error_sleep: Duration::from_secs(5),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run forever; spawn as a background task.
    pub async fn run(&self) {
        info!(
            service = %self.service_name,
            batch_size = self.batch_size,
            "Outbox processor started"
        );

        loop {
            match self.process_batch().await {
                Ok(0) => {
                    self.update_pending_gauge().await;
                    tokio::time::sleep(self.idle_sleep).await;
                }
                Ok(count) => {
                    info!(published_count = count, "Published outbox events");
                    self.update_pending_gauge().await;
                }
                Err(e) => {
                    error!(error = ?e, "Outbox processor cycle failed");
                    tokio::time::sleep(self.error_sleep).await;
                }
            }
        }
    }

    /// Process one batch; returns how many events were published.
    async fn process_batch(&self) -> OutboxResult<usize> {
        let mut tx = self.pool.begin().await?;
        let events = self.repository.claim_batch(&mut tx, self.batch_size).await?;
        if events.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let mut published = 0;
        for event in &events {
            match self.publisher.publish(event).await {
                Ok(()) => {
                    self.repository.mark_published(&mut tx, event.id).await?;
                    OUTBOX_PUBLISHED_TOTAL
                        .with_label_values(&[&self.service_name, &event.event_type])
                        .inc();
                    published += 1;
                }
                Err(e) => {
                    // Left unpublished; reselected next cycle.
                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "Outbox publish failed"
                    );
                }
            }
        }

        tx.commit().await?;
        Ok(published)
    }

    async fn update_pending_gauge(&self) {
        match self.repository.pending_count().await {
            Ok(pending) => OUTBOX_PENDING
                .with_label_values(&[&self.service_name])
                .set(pending),
            Err(e) => debug!(error = %e, "Failed to read outbox pending count"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_starts_unpublished() {
        let event = OutboxEvent::new(
            "order",
            Uuid::new_v4(),
            "order_created",
            serde_json::json!({"total": "20.00"}),
        );
        assert!(!event.published);
        assert!(event.published_at.is_none());
        assert_eq!(event.aggregate_type, "order");
        assert_eq!(event.event_type, "order_created");
    }

    #[test]
    fn test_http_publisher_builds_events_url() {
        let publisher = HttpEventPublisher::new("http://notifications:8004/").unwrap();
        assert_eq!(publisher.events_url, "http://notifications:8004/events");
    }
}
