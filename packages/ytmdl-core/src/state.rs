//! Queue state owned by the engine: batches, pause flag and in-flight bookkeeping

use crate::item::{unix_millis, BatchId, Item, ItemId, ItemState};
use crate::progress::ThroughputMeter;
use crate::traits::Resolution;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// Items produced by one resolved URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// URL as submitted
    pub url: String,
    pub title: String,
    /// Items sorted by ordinal
    pub items: Vec<Item>,
    /// Set by `cancel`, cleared again by `retry_failed`
    pub cancelled: bool,

    #[serde(with = "unix_millis")]
    pub created_at: SystemTime,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Every item reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.items.iter().all(|item| item.state.is_terminal())
    }

    pub fn count(&self, state: ItemState) -> usize {
        self.items.iter().filter(|item| item.state == state).count()
    }

    pub fn item(&self, item_id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == item_id)
    }
}

/// Aggregate item counters across all batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub paused: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Counters {
    pub(crate) fn record(&mut self, state: ItemState) {
        self.total += 1;
        match state {
            ItemState::Pending => self.pending += 1,
            ItemState::Active => self.active += 1,
            ItemState::Paused => self.paused += 1,
            ItemState::Succeeded => self.succeeded += 1,
            ItemState::Skipped => self.skipped += 1,
            ItemState::Failed => self.failed += 1,
        }
    }

    /// Items that reached a terminal state
    pub fn finished(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

/// An item handed to a worker by [`QueueState::claim_next`]
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub item: Item,
    pub batch_len: usize,
    pub cancel: CancellationToken,
}

/// Everything the engine tracks, guarded by a single lock
#[derive(Debug)]
pub struct QueueState {
    batches: Vec<Batch>,
    paused: bool,
    concurrency: usize,
    throughput: ThroughputMeter,
    /// Items currently held by a worker, with their abort signal
    in_flight: HashMap<ItemId, CancellationToken>,
    /// item id -> (batch id, position in the batch)
    index: HashMap<ItemId, (BatchId, usize)>,
    /// Occurrences of each base id, for duplicate suffixes
    seen_ids: HashMap<String, usize>,
}

impl QueueState {
    pub fn new(concurrency: usize, throughput_window: Duration) -> Self {
        Self {
            batches: Vec::new(),
            paused: false,
            concurrency: concurrency.max(1),
            throughput: ThroughputMeter::new(throughput_window),
            in_flight: HashMap::new(),
            index: HashMap::new(),
            seen_ids: HashMap::new(),
        }
    }

    /// Batches in submission order
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch(&self, batch_id: &BatchId) -> Option<&Batch> {
        self.batches.iter().find(|batch| &batch.id == batch_id)
    }

    pub(crate) fn batch_mut(&mut self, batch_id: &BatchId) -> Option<&mut Batch> {
        self.batches.iter_mut().find(|batch| &batch.id == batch_id)
    }

    pub(crate) fn batches_mut(&mut self) -> impl Iterator<Item = &mut Batch> {
        self.batches.iter_mut()
    }

    pub fn item(&self, item_id: &ItemId) -> Option<&Item> {
        let (batch_id, position) = self.index.get(item_id)?;
        self.batch(batch_id)?.items.get(*position)
    }

    pub(crate) fn item_mut(&mut self, item_id: &ItemId) -> Option<&mut Item> {
        let (batch_id, position) = self.index.get(item_id)?.clone();
        self.batch_mut(&batch_id)?.items.get_mut(position)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn throughput(&self) -> &ThroughputMeter {
        &self.throughput
    }

    pub(crate) fn record_completion(&mut self) {
        self.throughput.record();
    }

    /// Items held across all batches, terminal ones included
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// Items currently held by a worker
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn counters(&self) -> Counters {
        let mut counters = Counters::default();
        for item in self.batches.iter().flat_map(|batch| batch.items.iter()) {
            counters.record(item.state);
        }
        counters
    }

    /// No item is pending or held by a worker
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
            && self
                .batches
                .iter()
                .flat_map(|batch| batch.items.iter())
                .all(|item| item.state != ItemState::Pending)
    }

    /// Nothing is actively fetching and nothing more will be dispatched
    pub fn is_quiescent(&self) -> bool {
        let items = || self.batches.iter().flat_map(|batch| batch.items.iter());
        let none_active = items().all(|item| item.state != ItemState::Active);
        none_active && (self.paused || items().all(|item| item.state != ItemState::Pending))
    }

    /// Stable id for a new item, suffixed when the source was seen before
    fn allocate_id(&mut self, source_ref: &str) -> ItemId {
        let base = ItemId::from_source(source_ref);
        let seen = self.seen_ids.entry(base.as_str().to_string()).or_insert(0);
        *seen += 1;
        if *seen == 1 {
            base
        } else {
            base.with_suffix(*seen)
        }
    }

    /// Append a resolved batch with all items `Pending`
    pub(crate) fn push_resolution(&mut self, url: &str, resolution: Resolution) -> BatchId {
        let batch_id = BatchId::new();
        let mut specs = resolution.items;
        specs.sort_by_key(|spec| spec.ordinal);

        let mut items = Vec::with_capacity(specs.len());
        for (position, spec) in specs.into_iter().enumerate() {
            let id = self.allocate_id(&spec.source_ref);
            self.index
                .insert(id.clone(), (batch_id.clone(), position));
            items.push(Item::new(id, batch_id.clone(), spec));
        }

        self.batches.push(Batch {
            id: batch_id.clone(),
            url: url.to_string(),
            title: resolution.title,
            items,
            cancelled: false,
            created_at: SystemTime::now(),
        });

        batch_id
    }

    /// Dispatch the first pending item in global FIFO order
    ///
    /// Returns `None` while paused or when every worker slot is taken.
    pub(crate) fn claim_next(&mut self) -> Option<Claim> {
        if self.paused || self.in_flight.len() >= self.concurrency {
            return None;
        }

        let (batch_len, item) = self.batches.iter_mut().find_map(|batch| {
            // Ordinals are source positions and may skip hidden entries
            let len = batch
                .items
                .iter()
                .map(|item| item.ordinal as usize)
                .max()
                .unwrap_or(0)
                .max(batch.items.len());
            batch
                .items
                .iter_mut()
                .find(|item| item.state == ItemState::Pending)
                .map(|item| (len, item))
        })?;

        item.mark_active();
        let cancel = CancellationToken::new();
        let claim = Claim {
            item: item.clone(),
            batch_len,
            cancel: cancel.clone(),
        };
        self.in_flight.insert(claim.item.id.clone(), cancel);
        Some(claim)
    }

    /// Give up a worker's hold on an item
    pub(crate) fn release(&mut self, item_id: &ItemId) {
        self.in_flight.remove(item_id);
    }

    pub(crate) fn cancel_token(&self, item_id: &ItemId) -> Option<&CancellationToken> {
        self.in_flight.get(item_id)
    }

    /// Drop batches whose items are all terminal; returns how many were removed
    pub(crate) fn clear_finished(&mut self) -> usize {
        let before = self.batches.len();
        self.batches.retain(|batch| !batch.is_finished());
        let removed = before - self.batches.len();

        if removed > 0 {
            self.index.clear();
            for batch in &self.batches {
                for (position, item) in batch.items.iter().enumerate() {
                    self.index
                        .insert(item.id.clone(), (batch.id.clone(), position));
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{GroupKey, ItemSpec};

    fn resolution(ids: &[(&str, u32)]) -> Resolution {
        let items = ids
            .iter()
            .map(|(id, ordinal)| {
                ItemSpec::new(
                    format!("https://www.youtube.com/watch?v={}", id),
                    format!("Track {}", ordinal),
                    *ordinal,
                    GroupKey::new("Artist", "Playlist"),
                )
            })
            .collect();
        Resolution::new("Playlist", items)
    }

    fn state() -> QueueState {
        QueueState::new(2, Duration::from_secs(30))
    }

    #[test]
    fn test_push_sorts_by_ordinal() {
        let mut state = state();
        let batch_id = state.push_resolution(
            "https://example.com/list",
            resolution(&[("ccccccccccc", 3), ("aaaaaaaaaaa", 1), ("bbbbbbbbbbb", 2)]),
        );

        let batch = state.batch(&batch_id).unwrap();
        let ordinals: Vec<u32> = batch.items.iter().map(|item| item.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert!(batch.items.iter().all(|item| item.state == ItemState::Pending));
        assert_eq!(state.item_count(), 3);

        let id = ItemId::new("bbbbbbbbbbb");
        assert_eq!(state.item(&id).unwrap().ordinal, 2);
    }

    #[test]
    fn test_duplicate_sources_get_suffixes() {
        let mut state = state();
        state.push_resolution("a", resolution(&[("aaaaaaaaaaa", 1)]));
        let second = state.push_resolution("b", resolution(&[("aaaaaaaaaaa", 1)]));

        let item = &state.batch(&second).unwrap().items[0];
        assert_eq!(item.id.as_str(), "aaaaaaaaaaa#2");
        assert!(state.item(&item.id).is_some());
    }

    #[test]
    fn test_claim_respects_concurrency_and_pause() {
        let mut state = state();
        state.push_resolution(
            "a",
            resolution(&[("aaaaaaaaaaa", 1), ("bbbbbbbbbbb", 2), ("ccccccccccc", 3)]),
        );

        let first = state.claim_next().unwrap();
        assert_eq!(first.item.ordinal, 1);
        assert_eq!(first.batch_len, 3);
        assert_eq!(first.item.state, ItemState::Active);
        assert_eq!(first.item.attempts, 1);

        let second = state.claim_next().unwrap();
        assert_eq!(second.item.ordinal, 2);
        assert!(state.claim_next().is_none());

        state.release(&first.item.id);
        state.set_paused(true);
        assert!(state.claim_next().is_none());

        state.set_paused(false);
        assert_eq!(state.claim_next().unwrap().item.ordinal, 3);
    }

    #[test]
    fn test_counters_and_quiescence() {
        let mut state = state();
        state.push_resolution("a", resolution(&[("aaaaaaaaaaa", 1), ("bbbbbbbbbbb", 2)]));
        assert!(!state.is_idle());
        assert!(!state.is_quiescent());

        let claim = state.claim_next().unwrap();
        state.set_paused(true);
        assert!(!state.is_quiescent());

        state
            .item_mut(&claim.item.id)
            .unwrap()
            .mark_succeeded("/out/a.mp3".into());
        state.release(&claim.item.id);
        assert!(state.is_quiescent());

        let counters = state.counters();
        assert_eq!(counters.total, 2);
        assert_eq!(counters.succeeded, 1);
        assert_eq!(counters.pending, 1);
        assert_eq!(counters.finished(), 1);
    }

    #[test]
    fn test_clear_finished_keeps_index_consistent() {
        let mut state = state();
        let first = state.push_resolution("a", resolution(&[("aaaaaaaaaaa", 1)]));
        state.push_resolution("b", resolution(&[("bbbbbbbbbbb", 1)]));

        let claim = state.claim_next().unwrap();
        state
            .item_mut(&claim.item.id)
            .unwrap()
            .mark_skipped("gone");
        state.release(&claim.item.id);

        assert_eq!(state.clear_finished(), 1);
        assert!(state.batch(&first).is_none());
        assert_eq!(state.batches().len(), 1);
        assert!(state.item(&ItemId::new("bbbbbbbbbbb")).is_some());
        assert!(state.item(&ItemId::new("aaaaaaaaaaa")).is_none());
    }

    #[test]
    fn test_claim_batch_len_covers_highest_ordinal() {
        let mut state = state();
        // Position 3 of a ten entry playlist was hidden and never resolved
        let ordinals: Vec<(String, u32)> = [1u32, 2, 4, 5, 6, 7, 8, 9, 10]
            .iter()
            .map(|n| (format!("{:0>11}", n), *n))
            .collect();
        let ids: Vec<(&str, u32)> = ordinals.iter().map(|(id, n)| (id.as_str(), *n)).collect();
        state.push_resolution("a", resolution(&ids));

        let claim = state.claim_next().unwrap();
        assert_eq!(claim.item.ordinal, 1);
        assert_eq!(claim.batch_len, 10);
    }
}
