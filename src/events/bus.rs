//! In-memory fan-out event bus: buffered publish channel drained by a worker pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::types::{Event, FilterPredicate, Handler, Subscription};

/// Common publish seam shared by the in-memory bus and its persistent
/// wrapper, so callers (e.g. the Command/Query executor) don't need to know
/// which one backs a given deployment.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event) -> Result<(), EventBusError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("event bus is closed")]
    BusClosed,
    #[error("unknown subscription: {0}")]
    UnknownSubscription(Uuid),
}

struct Shared {
    subscribers: RwLock<HashMap<Uuid, Arc<Subscription>>>,
    closed: AtomicBool,
}

/// In-memory, worker-pool-backed pub/sub bus.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
    sender: Arc<RwLock<Option<mpsc::Sender<Event>>>>,
    workers: Arc<AsyncMutex<Option<Vec<JoinHandle<()>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(1000, 4)
    }

    pub fn with_config(buffer_size: usize, worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            subscribers: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::channel::<Event>(buffer_size.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));

        let worker_count = worker_count.max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = rx.clone();
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let event = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(event) = event else { break };

                    let subs: Vec<Arc<Subscription>> = shared
                        .subscribers
                        .read()
                        .values()
                        .cloned()
                        .collect();

                    for sub in subs {
                        if sub.matches(&event) {
                            if let Err(e) = (sub.handler)(&event) {
                                debug!("event subscriber {} failed: {}", sub.id, e);
                            }
                        }
                    }
                }
            }));
        }

        Self {
            shared,
            sender: Arc::new(RwLock::new(Some(tx))),
            workers: Arc::new(AsyncMutex::new(Some(handles))),
        }
    }

    /// Publish an event; fire-and-forget from the caller's perspective once
    /// accepted onto the channel.
    pub async fn publish(&self, event: Event) -> Result<(), EventBusError> {
        let sender = self.sender.read().clone();
        match sender {
            Some(tx) => tx.send(event).await.map_err(|_| EventBusError::BusClosed),
            None => Err(EventBusError::BusClosed),
        }
    }

    /// Best-effort publish that never awaits backpressure; used from sync call sites.
    pub fn publish_nowait(&self, event: Event) {
        let sender = self.sender.read().clone();
        if let Some(tx) = sender {
            let _ = tx.try_send(event);
        }
    }

    pub fn subscribe(
        &self,
        filters: Vec<FilterPredicate>,
        handler: Handler,
    ) -> Result<Uuid, EventBusError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EventBusError::BusClosed);
        }

        let id = Uuid::new_v4();
        let subscription = Subscription {
            id,
            filters,
            handler,
        };
        self.shared
            .subscribers
            .write()
            .insert(id, Arc::new(subscription));
        Ok(id)
    }

    pub fn unsubscribe(&self, id: Uuid) -> Result<(), EventBusError> {
        match self.shared.subscribers.write().remove(&id) {
            Some(_) => Ok(()),
            None => Err(EventBusError::UnknownSubscription(id)),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }

    /// Idempotent: closing an already-closed bus is a harmless no-op.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.sender.write().take();

        let handles = self.workers.lock().await.take();
        if let Some(handles) = handles {
            for h in handles {
                let _ = h.await;
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: Event) -> Result<(), EventBusError> {
        EventBus::publish(self, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn subscriber_receives_matching_event() {
        let bus = EventBus::with_config(16, 2);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        bus.subscribe(
            vec![super::super::types::by_domain("service")],
            Box::new(move |_e| {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        bus.publish(Event::new("started", "service", json!({}), "corr-1"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_filters_must_match() {
        let bus = EventBus::with_config(16, 1);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        bus.subscribe(
            vec![
                super::super::types::by_domain("service"),
                super::super::types::by_type("completed"),
            ],
            Box::new(move |_e| {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        bus.publish(Event::new("started", "service", json!({}), "c"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.publish(Event::new("completed", "service", json!({}), "c"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_not_invoked_again() {
        let bus = EventBus::with_config(16, 1);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let id = bus
            .subscribe(
                vec![],
                Box::new(move |_e| {
                    count2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        bus.unsubscribe(id).unwrap();
        assert!(matches!(
            bus.unsubscribe(id),
            Err(EventBusError::UnknownSubscription(_))
        ));

        bus.publish(Event::new("x", "y", json!({}), "c"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_further_use() {
        let bus = EventBus::with_config(16, 1);
        bus.close().await;
        bus.close().await;

        assert!(matches!(
            bus.publish(Event::new("x", "y", json!({}), "c")).await,
            Err(EventBusError::BusClosed)
        ));
        assert!(matches!(
            bus.subscribe(vec![], Box::new(|_| Ok(()))),
            Err(EventBusError::BusClosed)
        ));
    }
}
