//! Wires settings, command-line overrides and the yt-dlp adapters into a
//! running queue, and executes interactive commands against it

use crate::commands::{Command, HELP};
use crate::render::batch_report;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use ytmdl_config::Settings;
use ytmdl_core::{
    AudioFormat, BatchId, Controller, Fetcher, QueueConfig, QueueEngine, Resolver,
};
use ytmdl_ytdlp::{YtDlpConfig, YtDlpFetcher, YtDlpResolver};

/// Values given on the command line that take precedence over saved settings
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub output_dir: Option<PathBuf>,
    pub audio_format: Option<AudioFormat>,
    pub audio_quality: Option<u8>,
    pub concurrency: Option<usize>,
    pub no_thumbnail: bool,
    pub no_metadata: bool,
}

impl Overrides {
    /// Copy the persistable overrides into `settings`
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(format) = self.audio_format {
            settings.audio_format = format.to_string();
        }
        if let Some(quality) = self.audio_quality {
            settings.audio_quality = quality.to_string();
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
    }

    /// Engine configuration for `settings` with these overrides applied
    pub fn queue_config(&self, settings: &Settings) -> anyhow::Result<QueueConfig> {
        let mut settings = settings.clone();
        self.apply(&mut settings);

        let mut config = settings.queue_config().context("invalid settings")?;
        if self.no_thumbnail {
            config.output.embed_thumbnail = false;
        }
        if self.no_metadata {
            config.output.embed_metadata = false;
        }
        Ok(config)
    }
}

/// Outcome of one URL submission
#[derive(Debug)]
pub struct Submitted {
    pub url: String,
    pub result: Result<BatchId, String>,
}

struct PendingSubmission {
    url: String,
    ticket: JoinHandle<ytmdl_core::Result<BatchId>>,
}

impl PendingSubmission {
    async fn finish(self) -> Submitted {
        let result = match self.ticket.await {
            Ok(Ok(batch_id)) => Ok(batch_id),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("submission task failed: {}", e)),
        };
        Submitted {
            url: self.url,
            result,
        }
    }
}

/// What the input loop should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue(Option<String>),
    Quit,
}

pub struct Session {
    controller: Controller,
    settings: Settings,
    settings_path: Option<PathBuf>,
    submissions: Vec<PendingSubmission>,
}

impl Session {
    /// Start a queue backed by yt-dlp
    pub fn start(
        mut settings: Settings,
        overrides: &Overrides,
        ytdlp: YtDlpConfig,
    ) -> anyhow::Result<Self> {
        let config = overrides.queue_config(&settings)?;
        overrides.apply(&mut settings);

        let resolver = Arc::new(YtDlpResolver::new(ytdlp.clone()));
        let fetcher = Arc::new(YtDlpFetcher::new(ytdlp));
        Self::with_adapters(settings, config, resolver, fetcher)
    }

    /// Start a queue with the given adapters
    pub fn with_adapters(
        settings: Settings,
        config: QueueConfig,
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn Fetcher>,
    ) -> anyhow::Result<Self> {
        info!(
            "Saving to {} as {} with {} parallel downloads",
            config.output.root_dir.display(),
            config.output.audio_format,
            config.concurrency
        );
        let engine =
            QueueEngine::new(resolver, fetcher, config).context("invalid queue configuration")?;

        Ok(Self {
            controller: Controller::start(engine),
            settings,
            settings_path: None,
            submissions: Vec::new(),
        })
    }

    /// Save settings to `path` instead of the default location
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Start resolving `url` in the background
    pub fn submit(&mut self, url: impl Into<String>) {
        let url = url.into();
        debug!("Submitting {}", url);
        let ticket = self.controller.submit(url.clone());
        self.submissions.push(PendingSubmission { url, ticket });
    }

    pub fn has_pending_submissions(&self) -> bool {
        !self.submissions.is_empty()
    }

    /// Collect submissions that have finished resolving, without waiting for the rest
    pub async fn take_finished_submissions(&mut self) -> Vec<Submitted> {
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.submissions)
            .into_iter()
            .partition(|submission| submission.ticket.is_finished());
        self.submissions = pending;

        let mut finished = Vec::with_capacity(done.len());
        for submission in done {
            finished.push(submission.finish().await);
        }
        finished
    }

    /// Wait for every outstanding submission
    pub async fn wait_for_submissions(&mut self) -> Vec<Submitted> {
        let mut finished = Vec::with_capacity(self.submissions.len());
        for submission in std::mem::take(&mut self.submissions) {
            finished.push(submission.finish().await);
        }
        finished
    }

    /// Nothing resolving, nothing queued or in flight
    pub fn is_done(&self) -> bool {
        !self.has_pending_submissions() && self.controller.snapshot().is_idle()
    }

    pub fn save_settings(&self) -> anyhow::Result<PathBuf> {
        match &self.settings_path {
            Some(path) => {
                self.settings
                    .save_to(path)
                    .with_context(|| format!("failed to save settings to {}", path.display()))?;
                Ok(path.clone())
            }
            None => self.settings.save().context("failed to save settings"),
        }
    }

    pub async fn execute(&mut self, command: Command) -> Flow {
        let message = match command {
            Command::TogglePause => {
                // The Paused/Resumed events carry the user-facing line
                self.controller.toggle_pause().await;
                None
            }
            Command::Cancel => Some(match self.controller.cancel(None) {
                Ok(0) => "Nothing to cancel".to_string(),
                Ok(n) => format!("Cancelled {} items", n),
                Err(e) => format!("Cancel failed: {}", e),
            }),
            Command::Retry => Some(match self.controller.retry_failed(None) {
                Ok(0) => "No failed items to retry".to_string(),
                Ok(n) => format!("Retrying {} failed items", n),
                Err(e) => format!("Retry failed: {}", e),
            }),
            Command::Add(url) => {
                let message = format!("Resolving {}", url);
                self.submit(url);
                Some(message)
            }
            Command::Save => Some(match self.save_settings() {
                Ok(path) => format!("Settings saved to {}", path.display()),
                Err(e) => format!("{:#}", e),
            }),
            Command::Help => Some(HELP.to_string()),
            Command::Quit => return Flow::Quit,
        };
        Flow::Continue(message)
    }

    /// Per-batch summaries with the reason for every item that did not succeed
    pub fn report(&self) -> Vec<String> {
        let engine = self.controller.engine();
        self.controller
            .snapshot()
            .batches
            .iter()
            .flat_map(|progress| {
                let items = engine.items(&progress.batch_id).unwrap_or_default();
                batch_report(progress, &items)
            })
            .collect()
    }

    /// Cancel whatever is still running and stop the workers
    pub async fn shutdown(&self) {
        if !self.controller.snapshot().is_idle() {
            if let Err(e) = self.controller.cancel(None) {
                debug!("Cancel on shutdown failed: {}", e);
            }
        }
        self.controller.shutdown().await;
    }
}
