//! Control surface: the handle front ends hold

use crate::error::Result;
use crate::events::{QueueEvent, QueueObserver};
use crate::item::BatchId;
use crate::progress::ProgressSnapshot;
use crate::queue::QueueEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Cheap, cloneable façade over a running [`QueueEngine`]
///
/// Every call returns promptly: `submit` hands resolution to the runtime and
/// gives back a ticket, the rest only take the state lock briefly.
#[derive(Clone)]
pub struct Controller {
    engine: Arc<QueueEngine>,
}

impl Controller {
    /// Wrap `engine` and start its worker pool
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(engine: QueueEngine) -> Self {
        engine.start();
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &QueueEngine {
        &self.engine
    }

    /// Resolve and enqueue `url` in the background
    ///
    /// The returned handle yields the new batch id, or the resolution or
    /// capacity error that kept it out of the queue.
    pub fn submit(&self, url: impl Into<String>) -> JoinHandle<Result<BatchId>> {
        let engine = self.engine.clone();
        let url = url.into();
        tokio::spawn(async move { engine.submit(&url).await })
    }

    pub async fn pause(&self) {
        self.engine.pause().await
    }

    pub async fn resume(&self) {
        self.engine.resume().await
    }

    /// Pause when running, resume when paused; returns the new pause flag
    pub async fn toggle_pause(&self) -> bool {
        if self.engine.is_paused() {
            self.engine.resume().await;
            false
        } else {
            self.engine.pause().await;
            true
        }
    }

    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    /// Cancel one batch, or everything with `None`
    pub fn cancel(&self, batch_id: Option<&BatchId>) -> Result<usize> {
        self.engine.cancel(batch_id)
    }

    pub fn retry_failed(&self, batch_id: Option<&BatchId>) -> Result<usize> {
        self.engine.retry_failed(batch_id)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.engine.snapshot()
    }

    pub async fn wait_for_change(&self, timeout: Duration) -> ProgressSnapshot {
        self.engine.wait_for_change(timeout).await
    }

    pub async fn wait_until_idle(&self) {
        self.engine.wait_until_idle().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.engine.subscribe()
    }

    pub fn register(&self, observer: Arc<dyn QueueObserver>) -> JoinHandle<()> {
        self.engine.register(observer)
    }

    pub fn clear_finished(&self) -> usize {
        self.engine.clear_finished()
    }

    /// Stop the worker pool after the items in hand
    pub async fn shutdown(&self) {
        self.engine.shutdown().await
    }
}
