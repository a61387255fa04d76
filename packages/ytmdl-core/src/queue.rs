//! Queue engine: resolution, concurrency-limited dispatch, retry policy and
//! pause/resume/cancel handling

use crate::config::QueueConfig;
use crate::error::{QueueError, ResolveError, Result};
use crate::events::{EventHub, QueueEvent, QueueObserver};
use crate::item::{BatchId, Item, ItemId, ItemState, SKIP_REASON_CANCELLED};
use crate::progress::ProgressSnapshot;
use crate::state::{Batch, Claim, QueueState};
use crate::traits::{
    FetchOutcome, FetchRequest, Fetcher, FetcherCapabilities, ProgressCallback, Resolution,
    Resolver,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Worker pool handles
struct Lifecycle {
    workers: Vec<JoinHandle<()>>,
    stop: CancellationToken,
}

/// What a worker does after a fetch attempt settled
enum Settled {
    Done,
    RetryAfter(Duration),
}

/// Download queue engine
///
/// Owns every batch and item, runs a fixed pool of workers pulling pending
/// items in FIFO order, and applies the retry/skip policy to fetch outcomes.
pub struct QueueEngine {
    /// Single owned aggregate; only dispatch and completion handling mutate items
    state: Arc<RwLock<QueueState>>,

    resolver: Arc<dyn Resolver>,

    fetcher: Arc<dyn Fetcher>,

    config: Arc<QueueConfig>,

    /// Wakes idle workers and long-polling callers on every change
    notifier: Arc<Notify>,

    events: EventHub,

    lifecycle: Arc<Mutex<Lifecycle>>,

    /// Fetcher capabilities (cached at construction)
    capabilities: FetcherCapabilities,
}

impl QueueEngine {
    /// Create an engine; workers are not running until [`start`](Self::start)
    pub fn new(
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn Fetcher>,
        config: QueueConfig,
    ) -> Result<Self> {
        config.validate()?;
        let capabilities = fetcher.capabilities().clone();
        let state = QueueState::new(config.concurrency, config.throughput_window());

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            resolver,
            fetcher,
            events: EventHub::new(config.event_capacity),
            config: Arc::new(config),
            notifier: Arc::new(Notify::new()),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                workers: Vec::new(),
                stop: CancellationToken::new(),
            })),
            capabilities,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &FetcherCapabilities {
        &self.capabilities
    }

    /// Resolve `url` and append its items as a new batch
    ///
    /// # Returns
    /// * `Ok(batch_id)` - All items are `Pending`
    /// * `Err(QueueError::Resolution)` - Nothing was enqueued
    /// * `Err(QueueError::Capacity)` - The batch would exceed `max_queue_size`
    pub async fn submit(&self, url: &str) -> Result<BatchId> {
        let url = url.trim();
        if url.is_empty() {
            return Err(QueueError::invalid_input("URL must not be empty"));
        }

        {
            let state = self.state.read();
            if state.item_count() >= self.config.max_queue_size {
                return Err(QueueError::capacity(1, 0));
            }
        }

        let resolution = self.resolve_with_retry(url).await?;
        if resolution.items.is_empty() {
            return Err(ResolveError::not_found(format!("no downloadable items at {}", url)).into());
        }

        let title = resolution.title.clone();
        let items = resolution.items.len();
        let batch_id = {
            let mut state = self.state.write();
            let available = self
                .config
                .max_queue_size
                .saturating_sub(state.item_count());
            if items > available {
                return Err(QueueError::capacity(items, available));
            }
            state.push_resolution(url, resolution)
        };

        info!("Queued batch {} \"{}\" with {} items", batch_id, title, items);
        self.events.emit(QueueEvent::BatchAdded {
            batch_id: batch_id.clone(),
            title,
            items,
        });
        self.notifier.notify_waiters();

        Ok(batch_id)
    }

    async fn resolve_with_retry(&self, url: &str) -> Result<Resolution> {
        let max_attempts = self.config.resolve_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(
                "Resolving {} with {} (attempt {}/{})",
                url,
                self.resolver.name(),
                attempt,
                max_attempts
            );

            match self.resolver.resolve(url).await {
                Ok(resolution) => return Ok(resolution),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        "Resolving {} failed: {}. Retrying in {:?}",
                        url, err.message, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!("Resolving {} failed: {}", url, err);
                    return Err(err.into());
                }
            }
        }
    }

    /// Start the worker pool if it is not already running
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.workers.is_empty() {
            return;
        }

        lifecycle.stop = CancellationToken::new();
        for worker_id in 0..self.config.concurrency {
            let engine = self.clone_for_task();
            let stop = lifecycle.stop.clone();
            lifecycle
                .workers
                .push(tokio::spawn(engine.run_worker(worker_id, stop)));
        }
        info!("Started {} download workers", self.config.concurrency);
    }

    pub fn is_running(&self) -> bool {
        !self.lifecycle.lock().workers.is_empty()
    }

    /// Stop the worker pool once each worker finishes its current item
    ///
    /// Items waiting out a retry backoff go back to `Pending`.
    pub async fn shutdown(&self) {
        let workers = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.stop.cancel();
            std::mem::take(&mut lifecycle.workers)
        };

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Download worker ended abnormally: {}", e);
            }
        }
        self.notifier.notify_waiters();
        debug!("Worker pool stopped");
    }

    /// Stop dispatching new items
    ///
    /// With a pause-capable fetcher, active items are suspended and flagged
    /// `Paused`; otherwise, or when the fetcher refuses to suspend one, they
    /// stay `Active` and run to a terminal state.
    pub async fn pause(&self) {
        let (suspended, events) = {
            let mut state = self.state.write();
            if state.is_paused() {
                return;
            }
            state.set_paused(true);

            let mut suspended = Vec::new();
            let mut events = Vec::new();
            if self.capabilities.supports_pause {
                for batch in state.batches_mut() {
                    for item in batch.items.iter_mut() {
                        if item.state == ItemState::Active {
                            item.mark_paused();
                            events.push(transition(item, ItemState::Active));
                            suspended.push(item.id.clone());
                        }
                    }
                }
            }
            (suspended, events)
        };

        info!("Queue paused ({} items suspended)", suspended.len());
        self.events.emit(QueueEvent::Paused);
        self.emit_all(events);
        self.notifier.notify_waiters();

        for item_id in suspended {
            if let Err(e) = self.fetcher.pause(&item_id).await {
                debug!("Could not suspend {}: {}", item_id, e);
                self.unsuspend(&item_id);
            }
        }
    }

    /// Flag an item `Active` again after the fetcher refused to suspend it,
    /// so it runs to completion like a non-pausable fetch
    fn unsuspend(&self, item_id: &ItemId) {
        let event = {
            let mut state = self.state.write();
            match state.item_mut(item_id) {
                Some(item) if item.state == ItemState::Paused => {
                    item.mark_resumed();
                    transition(item, ItemState::Paused)
                }
                _ => return,
            }
        };

        self.events.emit(event);
        self.notifier.notify_waiters();
    }

    /// Clear the pause flag, resume suspended items and continue dispatching
    pub async fn resume(&self) {
        let (resumed, events) = {
            let mut state = self.state.write();
            if !state.is_paused() {
                return;
            }
            state.set_paused(false);

            let mut resumed = Vec::new();
            let mut events = Vec::new();
            for batch in state.batches_mut() {
                for item in batch.items.iter_mut() {
                    if item.state == ItemState::Paused {
                        item.mark_resumed();
                        events.push(transition(item, ItemState::Paused));
                        resumed.push(item.id.clone());
                    }
                }
            }
            (resumed, events)
        };

        info!("Queue resumed");
        for item_id in &resumed {
            if let Err(e) = self.fetcher.resume(item_id).await {
                debug!("Could not resume {}: {}", item_id, e);
            }
        }

        self.events.emit(QueueEvent::Resumed);
        self.emit_all(events);
        self.notifier.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().is_paused()
    }

    /// Skip every non-terminal item in scope and abort their fetches
    ///
    /// # Arguments
    /// * `batch_id` - Limit the cancel to one batch; `None` cancels everything
    ///
    /// # Returns
    /// The number of items moved to `Skipped`
    pub fn cancel(&self, batch_id: Option<&BatchId>) -> Result<usize> {
        let events = {
            let mut state = self.state.write();
            if let Some(id) = batch_id {
                if state.batch(id).is_none() {
                    return Err(QueueError::batch_not_found(id));
                }
            }

            let mut events = Vec::new();
            let mut aborted = Vec::new();
            for batch in state.batches_mut() {
                if batch_id.map_or(false, |id| &batch.id != id) {
                    continue;
                }
                batch.cancelled = true;
                for item in batch.items.iter_mut() {
                    if item.state.is_terminal() {
                        continue;
                    }
                    let from = item.state;
                    if from.is_in_flight() {
                        aborted.push(item.id.clone());
                    }
                    item.mark_skipped(SKIP_REASON_CANCELLED);
                    events.push(transition(item, from));
                }
            }

            for item_id in &aborted {
                if let Some(token) = state.cancel_token(item_id) {
                    token.cancel();
                }
            }
            events
        };

        let count = events.len();
        match batch_id {
            Some(id) => info!("Cancelled batch {} ({} items skipped)", id, count),
            None => info!("Cancelled all batches ({} items skipped)", count),
        }

        self.events.emit(QueueEvent::Cancelled {
            batch_id: batch_id.cloned(),
        });
        self.emit_all(events);
        self.notifier.notify_waiters();

        Ok(count)
    }

    /// Move `Failed` items below the attempt cap back to `Pending`
    ///
    /// # Returns
    /// The number of items re-enqueued
    pub fn retry_failed(&self, batch_id: Option<&BatchId>) -> Result<usize> {
        let max_attempts = self.config.max_attempts;
        let events = {
            let mut state = self.state.write();
            if let Some(id) = batch_id {
                if state.batch(id).is_none() {
                    return Err(QueueError::batch_not_found(id));
                }
            }

            let mut events = Vec::new();
            for batch in state.batches_mut() {
                if batch_id.map_or(false, |id| &batch.id != id) {
                    continue;
                }
                let before = events.len();
                for item in batch.items.iter_mut() {
                    if item.state.is_retryable() && item.attempts < max_attempts {
                        item.mark_requeued();
                        events.push(transition(item, ItemState::Failed));
                    }
                }
                if events.len() > before {
                    batch.cancelled = false;
                }
            }
            events
        };

        let count = events.len();
        info!("Re-enqueued {} failed items", count);
        self.emit_all(events);
        if count > 0 {
            self.notifier.notify_waiters();
        }

        Ok(count)
    }

    /// Current progress, recomputed from the queue state
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::capture(&self.state.read())
    }

    /// Wait for the next state change (long-polling support)
    ///
    /// Returns the snapshot after the change, or the current one on timeout.
    pub async fn wait_for_change(&self, timeout: Duration) -> ProgressSnapshot {
        let _ = tokio::time::timeout(timeout, self.notifier.notified()).await;
        self.snapshot()
    }

    /// Resolve once no item is pending or held by a worker
    ///
    /// Never resolves while the queue is paused with pending items left.
    pub async fn wait_until_idle(&self) {
        self.wait_until(QueueState::is_idle).await
    }

    /// Resolve once nothing is actively fetching and nothing more will be
    /// dispatched, e.g. after `pause()` with a fetcher that cannot suspend
    pub async fn wait_until_quiescent(&self) {
        self.wait_until(QueueState::is_quiescent).await
    }

    async fn wait_until(&self, condition: fn(&QueueState) -> bool) {
        loop {
            let notified = self.notifier.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if condition(&self.state.read()) {
                return;
            }
            notified.await;
        }
    }

    /// Drop batches whose items are all terminal
    pub fn clear_finished(&self) -> usize {
        let removed = self.state.write().clear_finished();
        if removed > 0 {
            debug!("Cleared {} finished batches", removed);
            self.notifier.notify_waiters();
        }
        removed
    }

    pub fn batch(&self, batch_id: &BatchId) -> Result<Batch> {
        self.state
            .read()
            .batch(batch_id)
            .cloned()
            .ok_or_else(|| QueueError::batch_not_found(batch_id))
    }

    /// Items of one batch in ordinal order
    pub fn items(&self, batch_id: &BatchId) -> Result<Vec<Item>> {
        self.batch(batch_id).map(|batch| batch.items)
    }

    pub fn item(&self, item_id: &ItemId) -> Option<Item> {
        self.state.read().item(item_id).cloned()
    }

    /// All batches in submission order
    pub fn batches(&self) -> Vec<Batch> {
        self.state.read().batches().to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Attach an observer driven by its own task
    pub fn register(&self, observer: Arc<dyn QueueObserver>) -> JoinHandle<()> {
        self.events.register(observer)
    }

    async fn run_worker(self, worker_id: usize, stop: CancellationToken) {
        debug!("Worker {} started", worker_id);

        loop {
            let notified = self.notifier.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if stop.is_cancelled() {
                break;
            }

            let claim = self.state.write().claim_next();
            match claim {
                Some(claim) => {
                    debug!(
                        "Worker {} picked up {} (attempt {})",
                        worker_id, claim.item.id, claim.item.attempts
                    );
                    self.events
                        .emit(transition(&claim.item, ItemState::Pending));
                    self.notifier.notify_waiters();
                    self.process(claim, &stop).await;
                }
                None => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = stop.cancelled() => break,
                    }
                }
            }
        }

        debug!("Worker {} stopped", worker_id);
    }

    /// Drive one item until it settles or is handed back to the queue
    async fn process(&self, claim: Claim, stop: &CancellationToken) {
        let Claim {
            item,
            batch_len,
            cancel,
        } = claim;
        let mut attempt = item.attempts;

        loop {
            let request = FetchRequest {
                item_id: item.id.clone(),
                source_ref: item.source_ref.clone(),
                display_name: item.display_name.clone(),
                ordinal: item.ordinal,
                batch_len,
                group_key: item.group_key.clone(),
                output: self.config.output.clone(),
                attempt,
                cancel: cancel.clone(),
            };

            let progress = self.progress_callback(&item.id, attempt);
            let outcome = self.fetcher.fetch(request, progress).await;

            match self.settle(&item.id, attempt, outcome) {
                Settled::Done => break,
                Settled::RetryAfter(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {}
                        _ = stop.cancelled() => {}
                    }
                    match self.reclaim(&item.id, stop.is_cancelled()) {
                        Some(next) => attempt = next,
                        None => break,
                    }
                }
            }
        }

        self.notifier.notify_waiters();
    }

    /// Apply the retry/skip policy to one fetch outcome
    fn settle(&self, item_id: &ItemId, attempt: u32, outcome: FetchOutcome) -> Settled {
        let mut state = self.state.write();

        let Some(item) = state.item_mut(item_id) else {
            state.release(item_id);
            return Settled::Done;
        };

        // Cancelled (or otherwise moved on) while the fetch was running
        if !item.state.is_in_flight() || item.attempts != attempt {
            state.release(item_id);
            return Settled::Done;
        }

        let from = item.state;
        match outcome {
            FetchOutcome::Succeeded(path) => {
                info!("Downloaded {} to {}", item.display_name, path.display());
                item.mark_succeeded(path);
            }
            FetchOutcome::Skipped(reason) => {
                info!("Skipped {}: {}", item.display_name, reason);
                item.mark_skipped(reason);
            }
            FetchOutcome::Failed(err) if err.is_permanent() => {
                warn!("Skipping unavailable {}: {}", item.display_name, err.message);
                item.mark_skipped(err.message);
            }
            FetchOutcome::Failed(err)
                if err.is_transient() && item.attempts < self.config.max_attempts =>
            {
                let delay = self.config.backoff_for(item.attempts);
                warn!(
                    "Fetching {} failed (attempt {}/{}): {}. Retrying in {:?}",
                    item.display_name, item.attempts, self.config.max_attempts, err, delay
                );
                return Settled::RetryAfter(delay);
            }
            FetchOutcome::Failed(err) => {
                warn!(
                    "Fetching {} failed after {} attempts: {}",
                    item.display_name, item.attempts, err
                );
                item.mark_failed(err);
            }
        }

        let event = transition(item, from);
        state.release(item_id);
        state.record_completion();
        drop(state);

        self.events.emit(event);
        Settled::Done
    }

    /// Take the item back after a retry backoff
    ///
    /// Returns the next attempt number, or `None` when the item was cancelled
    /// or handed back to `Pending` because the queue paused or is stopping.
    fn reclaim(&self, item_id: &ItemId, stopping: bool) -> Option<u32> {
        let mut state = self.state.write();
        let paused = state.is_paused();

        let Some(item) = state.item_mut(item_id) else {
            state.release(item_id);
            return None;
        };

        if !item.state.is_in_flight() {
            state.release(item_id);
            return None;
        }

        if paused || stopping {
            let from = item.state;
            item.mark_requeued();
            let event = transition(item, from);
            state.release(item_id);
            drop(state);

            debug!("Returned {} to the queue", item_id);
            self.events.emit(event);
            return None;
        }

        item.mark_retrying();
        let attempt = item.attempts;
        drop(state);

        self.events.emit(QueueEvent::ItemProgress {
            item_id: item_id.clone(),
            progress: 0.0,
        });
        Some(attempt)
    }

    fn progress_callback(&self, item_id: &ItemId, attempt: u32) -> ProgressCallback {
        let state = self.state.clone();
        let events = self.events.clone();
        let notifier = self.notifier.clone();
        let item_id = item_id.clone();

        Box::new(move |fraction: f64| {
            let updated = {
                let mut state = state.write();
                match state.item_mut(&item_id) {
                    Some(item) if item.attempts == attempt => item.update_progress(fraction),
                    _ => None,
                }
            };

            if let Some(progress) = updated {
                events.emit(QueueEvent::ItemProgress {
                    item_id: item_id.clone(),
                    progress,
                });
                notifier.notify_waiters();
            }
        })
    }

    fn emit_all(&self, events: Vec<QueueEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    /// Clone the shared handles for a spawned worker
    fn clone_for_task(&self) -> Self {
        Self {
            state: self.state.clone(),
            resolver: self.resolver.clone(),
            fetcher: self.fetcher.clone(),
            config: self.config.clone(),
            notifier: self.notifier.clone(),
            events: self.events.clone(),
            lifecycle: self.lifecycle.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

fn transition(item: &Item, from: ItemState) -> QueueEvent {
    QueueEvent::ItemStateChanged {
        batch_id: item.batch_id.clone(),
        item_id: item.id.clone(),
        display_name: item.display_name.clone(),
        from,
        to: item.state,
    }
}
