//! Progress aggregation
//!
//! Snapshots are recomputed from the queue state on every call and never
//! patched incrementally. Skipped and failed items are left out of a batch's
//! denominator: a batch where four items succeeded and one was unavailable is
//! complete (fraction 1.0), while the skip stays visible in its own counter.

use crate::item::{unix_millis, BatchId, ItemState, SKIP_REASON_CANCELLED};
use crate::state::{Batch, Counters, QueueState};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime};

/// Completions per second over a sliding window
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    /// Completion timestamps inside the window
    samples: VecDeque<Instant>,
    window: Duration,
    /// First completion ever, used while the window is still filling
    start_time: Option<Instant>,
}

impl ThroughputMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window,
            start_time: None,
        }
    }

    /// Create with the default 30-second window
    pub fn default_window() -> Self {
        Self::new(Duration::from_secs(30))
    }

    /// Record one finished item
    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    fn record_at(&mut self, now: Instant) {
        if self.start_time.is_none() {
            self.start_time = Some(now);
        }
        self.samples.push_back(now);
        self.evict(now);
    }

    fn evict(&mut self, now: Instant) {
        while let Some(time) = self.samples.front() {
            if now.duration_since(*time) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average completions per second, `None` before the first completion
    pub fn items_per_sec(&self) -> Option<f64> {
        self.items_per_sec_at(Instant::now())
    }

    fn items_per_sec_at(&self, now: Instant) -> Option<f64> {
        let start = self.start_time?;
        let in_window = self
            .samples
            .iter()
            .filter(|time| now.duration_since(**time) <= self.window)
            .count();

        // Until a full window has elapsed, divide by the time actually observed
        let elapsed = now.duration_since(start).min(self.window);
        let secs = elapsed.as_secs_f64().max(1.0);
        Some(in_window as f64 / secs)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.start_time = None;
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::default_window()
    }
}

/// Aggregate view of one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub url: String,
    pub title: String,
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub paused: usize,
    pub succeeded: usize,
    /// Skipped items, cancelled ones included
    pub skipped: usize,
    /// Subset of `skipped` drained by a cancel request
    pub cancelled: usize,
    pub failed: usize,
    /// 0.0..=1.0, skipped and failed items excluded from the denominator
    pub fraction: f64,
    /// Names of items currently held by a worker, in ordinal order
    pub active_items: Vec<String>,
    pub finished: bool,
    pub was_cancelled: bool,
}

impl BatchProgress {
    pub fn from_batch(batch: &Batch) -> Self {
        let mut counters = Counters::default();
        let mut cancelled = 0;
        let mut done = 0.0;
        let mut active_items = Vec::new();

        for item in &batch.items {
            counters.record(item.state);
            match item.state {
                ItemState::Succeeded => done += 1.0,
                ItemState::Skipped | ItemState::Failed => {}
                _ => done += item.progress,
            }
            if item.state.is_in_flight() {
                active_items.push(item.display_name.clone());
            }
            if item.state == ItemState::Skipped
                && item.skip_reason.as_deref() == Some(SKIP_REASON_CANCELLED)
            {
                cancelled += 1;
            }
        }

        let contributors = counters.total - counters.skipped - counters.failed;
        let fraction = if contributors == 0 {
            1.0
        } else {
            (done / contributors as f64).clamp(0.0, 1.0)
        };

        Self {
            batch_id: batch.id.clone(),
            url: batch.url.clone(),
            title: batch.title.clone(),
            total: counters.total,
            pending: counters.pending,
            active: counters.active,
            paused: counters.paused,
            succeeded: counters.succeeded,
            skipped: counters.skipped,
            cancelled,
            failed: counters.failed,
            fraction,
            active_items,
            finished: batch.is_finished(),
            was_cancelled: batch.cancelled,
        }
    }

    /// Skipped because the source could not be fetched, not because of a cancel
    pub fn unavailable(&self) -> usize {
        self.skipped - self.cancelled
    }

    /// One-line outcome, e.g. "Completed 18/20, 2 unavailable"
    pub fn summary(&self) -> String {
        let mut line = format!("Completed {}/{}", self.succeeded, self.total);
        if self.unavailable() > 0 {
            line.push_str(&format!(", {} unavailable", self.unavailable()));
        }
        if self.cancelled > 0 {
            line.push_str(&format!(", {} cancelled", self.cancelled));
        }
        if self.failed > 0 {
            line.push_str(&format!(", {} failed", self.failed));
        }
        line
    }
}

/// Immutable view of the whole queue at one instant
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    /// Per-batch aggregates in submission order
    pub batches: Vec<BatchProgress>,
    pub counters: Counters,
    /// Batch fractions weighted by batch size
    pub fraction: f64,
    /// Completions per second over the throughput window
    pub items_per_sec: Option<f64>,
    pub paused: bool,
    /// Nothing is fetching and nothing more will be dispatched
    pub quiescent: bool,
    #[serde(with = "unix_millis")]
    pub captured_at: SystemTime,
}

impl ProgressSnapshot {
    pub fn capture(state: &QueueState) -> Self {
        let batches: Vec<BatchProgress> =
            state.batches().iter().map(BatchProgress::from_batch).collect();

        let weight: usize = batches.iter().map(|batch| batch.total).sum();
        let fraction = if weight == 0 {
            1.0
        } else {
            batches
                .iter()
                .map(|batch| batch.fraction * batch.total as f64)
                .sum::<f64>()
                / weight as f64
        };

        Self {
            batches,
            counters: state.counters(),
            fraction,
            items_per_sec: state.throughput().items_per_sec(),
            paused: state.is_paused(),
            quiescent: state.is_quiescent(),
            captured_at: SystemTime::now(),
        }
    }

    pub fn batch(&self, batch_id: &BatchId) -> Option<&BatchProgress> {
        self.batches.iter().find(|batch| &batch.batch_id == batch_id)
    }

    /// No pending or in-flight work left
    pub fn is_idle(&self) -> bool {
        self.counters.pending + self.counters.active + self.counters.paused == 0
    }
}
