//! Bulkhead: bounded concurrency per downstream.
//!
//! Each downstream gets its own admission slot so a spike of slow payment
//! calls cannot starve inventory calls. Callers that cannot get a slot
//! within `max_wait` are rejected, not queued.

use crate::error::CallError;
use observability::metrics::BULKHEAD_REJECTIONS_TOTAL;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::warn;

#[derive(Clone)]
pub struct Bulkhead {
    name: String,
    max_concurrent: usize,
    max_wait: Duration,
    semaphore: Arc<Semaphore>,
}

impl Bulkhead {
    pub fn new(name: &str, max_concurrent: usize, max_wait: Duration) -> Self {
        Self {
            name: name.to_string(),
            max_concurrent,
            max_wait,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Execute `f` within the bulkhead, rejecting if at capacity.
    ///
    /// The permit is released when the guard drops, on every exit path.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let permit = match timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                BULKHEAD_REJECTIONS_TOTAL
                    .with_label_values(&[&self.name])
                    .inc();
                warn!(
                    downstream = %self.name,
                    max_concurrent = self.max_concurrent,
                    "Bulkhead rejected call"
                );
                return Err(CallError::BulkheadFull {
                    downstream: self.name.clone(),
                });
            }
        };

        let result = f().await;
        drop(permit);
        result
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_passes_through_when_capacity_available() {
        let bh = Bulkhead::new("test", 2, Duration::from_millis(50));
        let result = bh.call(|| async { Ok::<_, CallError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(bh.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_rejects_when_full() {
        let bh = Bulkhead::new("test", 1, Duration::from_millis(20));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = bh.clone();
        let task = tokio::spawn(async move {
            holder
                .call(|| async {
                    let _ = release_rx.await;
                    Ok::<_, CallError>(())
                })
                .await
        });

        // Give the holder time to take the only slot
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = bh.call(|| async { Ok::<_, CallError>(()) }).await;
        assert!(matches!(result, Err(CallError::BulkheadFull { .. })));

        let _ = release_tx.send(());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failure_does_not_leak_slot() {
        let bh = Bulkhead::new("test", 1, Duration::from_millis(20));

        let result = bh
            .call(|| async { Err::<(), _>(CallError::Transport("boom".into())) })
            .await;
        assert!(result.is_err());

        // The slot must be free again
        let result = bh.call(|| async { Ok::<_, CallError>(()) }).await;
        assert!(result.is_ok());
    }
}
