//! Download queue and progress engine
//!
//! Turns submitted URLs into batches of items through a [`Resolver`], fetches
//! them with a concurrency-limited worker pool driving a [`Fetcher`], and
//! exposes pause/resume/cancel plus progress snapshots through a
//! [`Controller`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ytmdl_core::{Controller, Fetcher, QueueConfig, QueueEngine, Resolver};
//!
//! async fn run(resolver: Arc<dyn Resolver>, fetcher: Arc<dyn Fetcher>) -> ytmdl_core::Result<()> {
//!     let engine = QueueEngine::new(resolver, fetcher, QueueConfig::default())?;
//!     let controller = Controller::start(engine);
//!
//!     let ticket = controller.submit("https://www.youtube.com/playlist?list=PL123");
//!     let batch_id = ticket.await.expect("submit task panicked")?;
//!     controller.wait_until_idle().await;
//!
//!     if let Some(batch) = controller.snapshot().batch(&batch_id) {
//!         println!("{}", batch.summary());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod item;
pub mod progress;
pub mod queue;
pub mod state;
pub mod traits;

pub use config::{AudioFormat, OutputSpec, QueueConfig};
pub use control::Controller;
pub use error::{
    FetchError, FetchErrorKind, QueueError, ResolveError, ResolveErrorKind, Result,
};
pub use events::{EventHub, QueueEvent, QueueObserver};
pub use item::{BatchId, GroupKey, Item, ItemId, ItemSpec, ItemState, SKIP_REASON_CANCELLED};
pub use progress::{BatchProgress, ProgressSnapshot, ThroughputMeter};
pub use queue::QueueEngine;
pub use state::{Batch, Counters, QueueState};
pub use traits::{
    FetchOutcome, FetchRequest, Fetcher, FetcherCapabilities, ProgressCallback, Resolution,
    Resolver,
};
