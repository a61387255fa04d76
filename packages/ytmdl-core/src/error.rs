//! Error types for the queue engine and its adapters

use crate::item::BatchId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kinds of resolution failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveErrorKind {
    /// Nothing downloadable lives at the URL
    NotFound,
    /// The URL is not understood by the resolver
    Unsupported,
    /// Network trouble while resolving (retryable)
    Network,
    /// The external resolution tool is missing or crashed
    Tool,
}

/// Error produced by a [`Resolver`](crate::Resolver)
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ResolveError {
    pub kind: ResolveErrorKind,
    pub message: String,
}

impl ResolveError {
    pub fn new(kind: ResolveErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ResolveErrorKind::NotFound, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ResolveErrorKind::Unsupported, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ResolveErrorKind::Network, message)
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(ResolveErrorKind::Tool, message)
    }

    /// Only network failures are worth another resolution attempt
    pub fn is_retryable(&self) -> bool {
        self.kind == ResolveErrorKind::Network
    }
}

/// Kinds of fetch failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Connection failed, reset, throttled or a 5xx answer
    Network,
    /// No progress within the allowed time
    Timeout,
    /// Item removed, private, members-only or otherwise gone
    Unavailable,
    /// Item exists but is blocked in this region
    RegionBlocked,
    /// Could not write or move the output file
    FileSystem,
    /// The external tool could not be started or exited abnormally
    Process,
    /// Fetch aborted through its cancellation signal
    Cancelled,
    /// Operation not supported by this fetcher
    Unsupported,
    /// Anything else
    Unknown,
}

impl FetchErrorKind {
    /// Failures that may succeed when simply tried again
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchErrorKind::Network | FetchErrorKind::Timeout)
    }

    /// Failures that no amount of retrying will fix; the item is skipped
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::Unavailable | FetchErrorKind::RegionBlocked
        )
    }
}

/// Error produced by a [`Fetcher`](crate::Fetcher)
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unavailable, message)
    }

    pub fn region_blocked(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RegionBlocked, message)
    }

    pub fn file_system(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::FileSystem, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Process, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Cancelled, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unsupported, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unknown, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn is_permanent(&self) -> bool {
        self.kind.is_permanent()
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        Self::file_system(err.to_string())
    }
}

/// Error returned by queue engine operations
///
/// Per-item fetch failures never surface here; they are recorded on the item.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The submitted URL could not be resolved; nothing was enqueued
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    /// Accepting the submission would exceed the configured queue size
    #[error("queue capacity exceeded: {requested} items requested, {available} slots left")]
    Capacity { requested: usize, available: usize },

    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl QueueError {
    pub fn capacity(requested: usize, available: usize) -> Self {
        Self::Capacity {
            requested,
            available,
        }
    }

    pub fn batch_not_found(batch_id: &BatchId) -> Self {
        Self::BatchNotFound(batch_id.clone())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
