//! Persistent event bus: wraps the in-memory bus with a durable, batched write-behind log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::bus::{EventBus, EventBusError, EventPublisher};
use super::store::{EventQuery, EventStoreError, SqliteEventStore};
use super::types::{Event, FilterPredicate, Handler};

const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps an `EventBus` with a background task that batches published events
/// into a `SqliteEventStore`, flushing on batch-size or a periodic timer,
/// whichever comes first. Subscriptions are served by the in-memory bus
/// directly; the store exists to support `replay` and historical queries.
pub struct PersistentEventBus {
    bus: EventBus,
    store: Arc<SqliteEventStore>,
    flush_tx: RwLock<Option<mpsc::Sender<Event>>>,
    flush_worker: AsyncMutex<Option<JoinHandle<()>>>,
}

impl PersistentEventBus {
    pub fn new(store: SqliteEventStore, batch_size: usize, flush_period_ms: u64) -> Arc<Self> {
        Self::with_bus(EventBus::new(), store, batch_size, flush_period_ms)
    }

    pub fn with_bus(
        bus: EventBus,
        store: SqliteEventStore,
        batch_size: usize,
        flush_period_ms: u64,
    ) -> Arc<Self> {
        let store = Arc::new(store);
        let (flush_tx, mut flush_rx) = mpsc::channel::<Event>(batch_size.max(1) * 4);

        let worker_store = store.clone();
        let batch_size = batch_size.max(1);
        let flush_period = Duration::from_millis(flush_period_ms.max(1));

        let flush_worker = tokio::spawn(async move {
            let mut pending = Vec::with_capacity(batch_size);
            loop {
                let deadline = tokio::time::sleep(flush_period);
                tokio::pin!(deadline);

                tokio::select! {
                    maybe_event = flush_rx.recv() => {
                        match maybe_event {
                            Some(event) => {
                                pending.push(event);
                                if pending.len() >= batch_size {
                                    flush(&worker_store, &mut pending).await;
                                }
                            }
                            None => {
                                flush(&worker_store, &mut pending).await;
                                break;
                            }
                        }
                    }
                    _ = &mut deadline => {
                        if !pending.is_empty() {
                            flush(&worker_store, &mut pending).await;
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            bus,
            store,
            flush_tx: RwLock::new(Some(flush_tx)),
            flush_worker: AsyncMutex::new(Some(flush_worker)),
        })
    }

    pub async fn publish(&self, event: Event) -> Result<(), EventBusError> {
        self.bus.publish(event.clone()).await?;
        // Best-effort: a full batching channel, or one already closed by
        // `close()`, drops the write-behind copy rather than apply
        // backpressure to publishers.
        let sent = self.flush_tx.read().as_ref().map(|tx| tx.try_send(event).is_ok());
        if sent == Some(false) {
            debug!("persistent event bus write-behind queue full, dropping durable copy");
        }
        Ok(())
    }

    pub fn subscribe(
        &self,
        filters: Vec<FilterPredicate>,
        handler: Handler,
    ) -> Result<uuid::Uuid, EventBusError> {
        self.bus.subscribe(filters, handler)
    }

    pub fn unsubscribe(&self, id: uuid::Uuid) -> Result<(), EventBusError> {
        self.bus.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Return every event sharing `correlation_id`, oldest first, from durable storage.
    pub async fn replay(&self, correlation_id: &str) -> Result<Vec<Event>, EventStoreError> {
        self.store.replay(correlation_id).await
    }

    pub async fn query(&self, q: &EventQuery) -> Result<Vec<Event>, EventStoreError> {
        self.store.query(q).await
    }

    /// Close the in-memory bus, then flush the write-behind queue and wait for
    /// the flush worker to exit, capped at a bounded drain window so a stuck
    /// database write cannot hang shutdown indefinitely.
    pub async fn close(&self) {
        self.bus.close().await;

        // Drop the one real sender so `flush_rx.recv()` observes the channel
        // closing and the worker runs its final flush before exiting.
        self.flush_tx.write().take();

        let handle = self.flush_worker.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, handle).await {
                Ok(_) => {}
                Err(_) => warn!("event store flush worker did not drain within the close timeout"),
            }
        }
    }
}

#[async_trait]
impl EventPublisher for PersistentEventBus {
    async fn publish(&self, event: Event) -> Result<(), EventBusError> {
        PersistentEventBus::publish(self, event).await
    }
}

async fn flush(store: &Arc<SqliteEventStore>, pending: &mut Vec<Event>) {
    if pending.is_empty() {
        return;
    }
    if let Err(e) = store.append_batch(pending).await {
        warn!("failed to flush events to durable store: {}", e);
    }
    pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn flushes_on_batch_size() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let pbus = PersistentEventBus::new(store, 2, 60_000);

        pbus.publish(Event::new("a", "d", json!({}), "c")).await.unwrap();
        pbus.publish(Event::new("b", "d", json!({}), "c")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let count = pbus.store.count().await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn flushes_on_timer_with_partial_batch() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let pbus = PersistentEventBus::new(store, 100, 30);

        pbus.publish(Event::new("a", "d", json!({}), "c")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let count = pbus.store.count().await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn replay_is_oldest_first_after_persistence() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let pbus = PersistentEventBus::new(store, 10, 30);

        pbus.publish(Event::new("started", "service", json!({}), "corr"))
            .await
            .unwrap();
        pbus.publish(Event::new("completed", "service", json!({}), "corr"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let replayed = pbus.replay("corr").await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].type_, "started");
        assert_eq!(replayed[1].type_, "completed");
    }

    #[tokio::test]
    async fn close_drains_pending_and_stops_worker() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let pbus = PersistentEventBus::new(store, 100, 60_000);

        pbus.publish(Event::new("a", "d", json!({}), "c")).await.unwrap();
        pbus.close().await;

        let count = pbus.store.count().await.unwrap();
        assert_eq!(count, 1);
    }
}
