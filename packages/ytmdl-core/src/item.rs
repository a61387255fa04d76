//! Item model: one downloadable track and its state machine

use crate::error::FetchError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;
use uuid::Uuid;

/// Skip reason recorded on items drained by a cancel request
pub const SKIP_REASON_CANCELLED: &str = "cancelled";

static VIDEO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[?&]v=|youtu\.be/|/shorts/|/embed/|/live/)([A-Za-z0-9_-]{11})")
        .expect("valid video id pattern")
});

static BARE_VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid bare id pattern"));

/// `SystemTime` as Unix milliseconds, for `#[serde(with = "unix_millis")]`
pub(crate) mod unix_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn to_millis(time: &SystemTime) -> u64 {
        time.duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }

    fn from_millis(millis: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(millis)
    }

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(to_millis(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        u64::deserialize(deserializer).map(from_millis)
    }

    /// Same encoding; `None` stays `null`
    pub mod option {
        use super::{from_millis, to_millis};
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::SystemTime;

        pub fn serialize<S: Serializer>(
            time: &Option<SystemTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(time) => serializer.serialize_some(&to_millis(time)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<SystemTime>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|millis| millis.map(from_millis))
        }
    }
}

/// Stable item identifier, derived from the source locator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from a source locator
    ///
    /// YouTube watch/short/embed URLs and bare 11 character ids collapse to the
    /// video id; anything else is used verbatim.
    pub fn from_source(source_ref: &str) -> Self {
        let source_ref = source_ref.trim();
        if BARE_VIDEO_ID.is_match(source_ref) {
            return Self(source_ref.to_string());
        }
        match VIDEO_ID.captures(source_ref) {
            Some(caps) => Self(caps[1].to_string()),
            None => Self(source_ref.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The n-th duplicate of this id within one queue
    pub(crate) fn with_suffix(&self, n: usize) -> Self {
        Self(format!("{}#{}", self.0, n))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Batch identifier (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Output grouping: `<artist>/<playlist>/`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub artist: String,
    pub playlist: String,
}

impl GroupKey {
    pub fn new(artist: impl Into<String>, playlist: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            playlist: playlist.into(),
        }
    }
}

/// Resolver output for one item, before it enters the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub source_ref: String,
    pub display_name: String,
    /// 1-based position within the playlist
    pub ordinal: u32,
    pub group_key: GroupKey,
}

impl ItemSpec {
    pub fn new(
        source_ref: impl Into<String>,
        display_name: impl Into<String>,
        ordinal: u32,
        group_key: GroupKey,
    ) -> Self {
        Self {
            source_ref: source_ref.into(),
            display_name: display_name.into(),
            ordinal,
            group_key,
        }
    }
}

/// Item state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Queued, not dispatched yet
    Pending,
    /// Held by a worker
    Active,
    /// Held by a worker whose fetch is cooperatively suspended
    Paused,
    Succeeded,
    /// Unavailable or cancelled; the batch carries on
    Skipped,
    Failed,
}

impl ItemState {
    /// Succeeded, skipped or failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Succeeded | ItemState::Skipped | ItemState::Failed
        )
    }

    /// Held by a worker (active or suspended)
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ItemState::Active | ItemState::Paused)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ItemState::Failed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemState::Pending => "pending",
            ItemState::Active => "active",
            ItemState::Paused => "paused",
            ItemState::Succeeded => "succeeded",
            ItemState::Skipped => "skipped",
            ItemState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One downloadable track tracked through its own state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub batch_id: BatchId,
    pub source_ref: String,
    pub display_name: String,
    pub ordinal: u32,
    pub group_key: GroupKey,
    pub state: ItemState,

    /// 0.0..=1.0, never decreases within one attempt
    pub progress: f64,

    /// Fetch attempts started so far (the first one included)
    pub attempts: u32,

    /// Present only while `Failed`
    pub last_error: Option<FetchError>,

    /// Present only while `Skipped`
    pub skip_reason: Option<String>,

    /// Present only while `Succeeded`
    pub output_path: Option<PathBuf>,

    #[serde(with = "unix_millis")]
    pub created_at: SystemTime,

    #[serde(with = "unix_millis::option")]
    pub started_at: Option<SystemTime>,

    #[serde(with = "unix_millis::option")]
    pub finished_at: Option<SystemTime>,
}

impl Item {
    pub fn new(id: ItemId, batch_id: BatchId, spec: ItemSpec) -> Self {
        Self {
            id,
            batch_id,
            source_ref: spec.source_ref,
            display_name: spec.display_name,
            ordinal: spec.ordinal,
            group_key: spec.group_key,
            state: ItemState::Pending,
            progress: 0.0,
            attempts: 0,
            last_error: None,
            skip_reason: None,
            output_path: None,
            created_at: SystemTime::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Pending -> Active, opening a fresh attempt
    pub fn mark_active(&mut self) {
        self.state = ItemState::Active;
        self.attempts += 1;
        self.progress = 0.0;
        self.last_error = None;
        self.started_at = Some(SystemTime::now());
    }

    /// Active -> Active on an automatic retry after a transient failure
    pub fn mark_retrying(&mut self) {
        self.attempts += 1;
        self.progress = 0.0;
    }

    pub fn mark_paused(&mut self) {
        self.state = ItemState::Paused;
    }

    pub fn mark_resumed(&mut self) {
        self.state = ItemState::Active;
    }

    pub fn mark_succeeded(&mut self, output_path: PathBuf) {
        self.state = ItemState::Succeeded;
        self.progress = 1.0;
        self.output_path = Some(output_path);
        self.finished_at = Some(SystemTime::now());
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.state = ItemState::Skipped;
        self.skip_reason = Some(reason.into());
        self.finished_at = Some(SystemTime::now());
    }

    pub fn mark_failed(&mut self, error: FetchError) {
        self.state = ItemState::Failed;
        self.last_error = Some(error);
        self.finished_at = Some(SystemTime::now());
    }

    /// Back to Pending with progress reset; the attempt count is kept
    pub fn mark_requeued(&mut self) {
        self.state = ItemState::Pending;
        self.progress = 0.0;
        self.last_error = None;
        self.finished_at = None;
    }

    /// Record fetch progress; returns the new value when it moved forward
    pub fn update_progress(&mut self, fraction: f64) -> Option<f64> {
        if !self.state.is_in_flight() || !fraction.is_finite() {
            return None;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction > self.progress {
            self.progress = fraction;
            Some(fraction)
        } else {
            None
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.state == ItemState::Skipped
            && self.skip_reason.as_deref() == Some(SKIP_REASON_CANCELLED)
    }
}
