//! State transition events and observers

use crate::item::{BatchId, ItemId, ItemState};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Something observable happened inside the queue engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    BatchAdded {
        batch_id: BatchId,
        title: String,
        items: usize,
    },
    ItemStateChanged {
        batch_id: BatchId,
        item_id: ItemId,
        display_name: String,
        from: ItemState,
        to: ItemState,
    },
    ItemProgress {
        item_id: ItemId,
        progress: f64,
    },
    Paused,
    Resumed,
    /// `None` when the whole queue was cancelled
    Cancelled {
        batch_id: Option<BatchId>,
    },
}

/// Observer for queue events
///
/// Every hook has an empty default so implementors pick what they need. Each
/// registered observer is driven by its own task.
#[async_trait]
pub trait QueueObserver: Send + Sync {
    /// Called when a submission resolved into a new batch
    async fn on_batch_added(&self, _batch_id: &BatchId, _title: &str, _items: usize) {}

    /// Called on every item state transition
    async fn on_item_state_changed(
        &self,
        _batch_id: &BatchId,
        _item_id: &ItemId,
        _display_name: &str,
        _from: ItemState,
        _to: ItemState,
    ) {
    }

    async fn on_item_progress(&self, _item_id: &ItemId, _progress: f64) {}

    /// Called when the queue is paused (`true`) or resumed (`false`)
    async fn on_pause_changed(&self, _paused: bool) {}

    async fn on_cancelled(&self, _batch_id: Option<&BatchId>) {}

    /// Called when the observer fell behind and `missed` events were dropped
    async fn on_lagged(&self, _missed: u64) {}
}

/// Dispatch a single event to the matching observer hook
pub async fn dispatch(observer: &dyn QueueObserver, event: &QueueEvent) {
    match event {
        QueueEvent::BatchAdded {
            batch_id,
            title,
            items,
        } => observer.on_batch_added(batch_id, title, *items).await,
        QueueEvent::ItemStateChanged {
            batch_id,
            item_id,
            display_name,
            from,
            to,
        } => {
            observer
                .on_item_state_changed(batch_id, item_id, display_name, *from, *to)
                .await
        }
        QueueEvent::ItemProgress { item_id, progress } => {
            observer.on_item_progress(item_id, *progress).await
        }
        QueueEvent::Paused => observer.on_pause_changed(true).await,
        QueueEvent::Resumed => observer.on_pause_changed(false).await,
        QueueEvent::Cancelled { batch_id } => observer.on_cancelled(batch_id.as_ref()).await,
    }
}

/// Fan-out point for queue events
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn emit(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// Get the number of live subscribers, observers included
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Drive `observer` from its own task until the hub is dropped
    pub fn register(&self, observer: Arc<dyn QueueObserver>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => dispatch(observer.as_ref(), &event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("queue observer lagged behind, {} events dropped", missed);
                        observer.on_lagged(missed).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingObserver {
        added: AtomicUsize,
        transitions: AtomicUsize,
        pauses: AtomicUsize,
        resumes: AtomicUsize,
    }

    #[async_trait]
    impl QueueObserver for CountingObserver {
        async fn on_batch_added(&self, _batch_id: &BatchId, _title: &str, _items: usize) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_item_state_changed(
            &self,
            _batch_id: &BatchId,
            _item_id: &ItemId,
            _display_name: &str,
            _from: ItemState,
            _to: ItemState,
        ) {
            self.transitions.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_pause_changed(&self, paused: bool) {
            if paused {
                self.pauses.fetch_add(1, Ordering::SeqCst);
            } else {
                self.resumes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn transition(to: ItemState) -> QueueEvent {
        QueueEvent::ItemStateChanged {
            batch_id: BatchId::from("batch"),
            item_id: ItemId::new("item"),
            display_name: "Track".to_string(),
            from: ItemState::Pending,
            to,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let hub = EventHub::new(16);
        let mut receiver = hub.subscribe();

        hub.emit(QueueEvent::Paused);
        hub.emit(transition(ItemState::Active));
        hub.emit(QueueEvent::Resumed);

        assert_eq!(receiver.recv().await.unwrap(), QueueEvent::Paused);
        assert_eq!(receiver.recv().await.unwrap(), transition(ItemState::Active));
        assert_eq!(receiver.recv().await.unwrap(), QueueEvent::Resumed);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_harmless() {
        let hub = EventHub::default();
        hub.emit(QueueEvent::Paused);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_registered_observer_is_driven() {
        let hub = EventHub::new(16);
        let observer = Arc::new(CountingObserver::default());
        let handle = hub.register(observer.clone());

        hub.emit(QueueEvent::BatchAdded {
            batch_id: BatchId::from("batch"),
            title: "Album".to_string(),
            items: 2,
        });
        hub.emit(transition(ItemState::Active));
        hub.emit(transition(ItemState::Succeeded));
        hub.emit(QueueEvent::Paused);
        hub.emit(QueueEvent::Resumed);
        drop(hub);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(observer.added.load(Ordering::SeqCst), 1);
        assert_eq!(observer.transitions.load(Ordering::SeqCst), 2);
        assert_eq!(observer.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(observer.resumes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(transition(ItemState::Skipped)).unwrap();
        assert_eq!(json["type"], "item_state_changed");
        assert_eq!(json["to"], "skipped");
        assert_eq!(json["item_id"], "item");
    }
}
