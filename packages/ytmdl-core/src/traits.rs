//! Adapter traits the queue engine drives
//!
//! A [`Resolver`] turns a submitted URL into an ordered list of item specs; a
//! [`Fetcher`] retrieves one item. Both are pluggable so the engine can be
//! exercised with in-memory doubles and driven by external tools in production.

use crate::config::OutputSpec;
use crate::error::{FetchError, ResolveError};
use crate::item::{GroupKey, ItemId, ItemSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Progress callback function type
/// Parameter: fraction of the item done, 0.0 to 1.0
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Fetcher capability information
///
/// Determined at construction time and constant for the fetcher's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FetcherCapabilities {
    /// Whether in-flight fetches can be suspended and resumed
    pub supports_pause: bool,
    /// Whether the fetcher honours the cancellation token in its request
    pub supports_cancellation: bool,
}

impl FetcherCapabilities {
    pub fn all_enabled() -> Self {
        Self {
            supports_pause: true,
            supports_cancellation: true,
        }
    }

    pub fn all_disabled() -> Self {
        Self::default()
    }
}

/// Result of resolving one URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Playlist title, or the track title for single items
    pub title: String,
    pub items: Vec<ItemSpec>,
}

impl Resolution {
    pub fn new(title: impl Into<String>, items: Vec<ItemSpec>) -> Self {
        Self {
            title: title.into(),
            items,
        }
    }
}

/// Resolves a user-supplied URL into downloadable items
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `url` into its items
    ///
    /// Items may come back in any order; the engine sorts by ordinal.
    async fn resolve(&self, url: &str) -> Result<Resolution, ResolveError>;

    /// Get the name of this resolver implementation
    fn name(&self) -> &str;
}

/// Everything a fetcher needs to retrieve one item
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub item_id: ItemId,
    pub source_ref: String,
    pub display_name: String,
    pub ordinal: u32,
    /// Length of the owning batch as numbered by ordinals (at least the
    /// highest ordinal), used for ordinal padding
    pub batch_len: usize,
    pub group_key: GroupKey,
    pub output: OutputSpec,
    /// 1-based attempt number
    pub attempt: u32,
    /// Fires when the item is cancelled; partial output must be discarded
    pub cancel: CancellationToken,
}

/// Terminal outcome of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Output file written at the given path
    Succeeded(PathBuf),
    /// The fetcher chose not to retrieve this item; the string is the reason
    Skipped(String),
    /// The attempt failed; the engine classifies the error
    Failed(FetchError),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Succeeded(_))
    }
}

impl From<Result<PathBuf, FetchError>> for FetchOutcome {
    fn from(result: Result<PathBuf, FetchError>) -> Self {
        match result {
            Ok(path) => FetchOutcome::Succeeded(path),
            Err(err) => FetchOutcome::Failed(err),
        }
    }
}

/// Retrieves a single item
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one item, reporting progress through `progress`
    ///
    /// Implementations should return promptly once `request.cancel` fires.
    async fn fetch(&self, request: FetchRequest, progress: ProgressCallback) -> FetchOutcome;

    /// Get the name of this fetcher implementation
    fn name(&self) -> &str;

    fn capabilities(&self) -> &FetcherCapabilities;

    /// Suspend an in-flight fetch
    ///
    /// Default implementation returns an error
    async fn pause(&self, _item_id: &ItemId) -> Result<(), FetchError> {
        Err(FetchError::unsupported(
            "Pause not supported by this fetcher",
        ))
    }

    /// Resume a suspended fetch
    ///
    /// Default implementation returns an error
    async fn resume(&self, _item_id: &ItemId) -> Result<(), FetchError> {
        Err(FetchError::unsupported(
            "Resume not supported by this fetcher",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;

    struct NoopFetcher {
        capabilities: FetcherCapabilities,
    }

    #[async_trait]
    impl Fetcher for NoopFetcher {
        async fn fetch(&self, request: FetchRequest, progress: ProgressCallback) -> FetchOutcome {
            progress(1.0);
            FetchOutcome::Succeeded(PathBuf::from(request.source_ref))
        }

        fn name(&self) -> &str {
            "noop"
        }

        fn capabilities(&self) -> &FetcherCapabilities {
            &self.capabilities
        }
    }

    #[test]
    fn test_capabilities() {
        let caps = FetcherCapabilities::all_enabled();
        assert!(caps.supports_pause);
        assert!(caps.supports_cancellation);
        assert_eq!(FetcherCapabilities::all_disabled(), FetcherCapabilities::default());
    }

    #[tokio::test]
    async fn test_default_pause_is_unsupported() {
        let fetcher = NoopFetcher {
            capabilities: FetcherCapabilities::all_disabled(),
        };
        let id = ItemId::new("abc");

        let err = fetcher.pause(&id).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
        let err = fetcher.resume(&id).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: FetchOutcome = Ok(PathBuf::from("/a.mp3")).into();
        assert!(ok.is_success());

        let failed: FetchOutcome = Err(FetchError::network("reset")).into();
        assert_eq!(failed, FetchOutcome::Failed(FetchError::network("reset")));
    }
}
