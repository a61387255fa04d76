//! Configuration for the queue engine and the output handed to fetchers

use crate::error::{QueueError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Audio container produced by the fetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    M4a,
    Flac,
    Wav,
    Opus,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 5] = [
        AudioFormat::Mp3,
        AudioFormat::M4a,
        AudioFormat::Flac,
        AudioFormat::Wav,
        AudioFormat::Opus,
    ];

    /// File extension of the final output
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
            AudioFormat::Opus => "opus",
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::Mp3
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.extension() == wanted)
            .ok_or_else(|| QueueError::invalid_input(format!("unknown audio format: {}", s)))
    }
}

/// Where and how fetched items are written
///
/// Path construction itself belongs to the fetcher; the engine only forwards
/// this value together with each item's naming metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub root_dir: PathBuf,

    #[serde(default)]
    pub audio_format: AudioFormat,

    /// 0 (best) to 9 (worst)
    #[serde(default)]
    pub audio_quality: u8,

    #[serde(default = "default_true")]
    pub embed_thumbnail: bool,

    #[serde(default = "default_true")]
    pub embed_metadata: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("Music"),
            audio_format: AudioFormat::default(),
            audio_quality: 0,
            embed_thumbnail: true,
            embed_metadata: true,
        }
    }
}

impl OutputSpec {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.audio_format = format;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.audio_quality = quality;
        self
    }
}

/// Queue engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of workers, i.e. items fetched at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fetch attempts per item, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound on items held across all batches
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Resolution attempts per submission (network errors only)
    #[serde(default = "default_resolve_attempts")]
    pub resolve_attempts: u32,

    /// First retry delay; doubles per attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Window used for the items/sec estimate
    #[serde(default = "default_throughput_window")]
    pub throughput_window_secs: u64,

    /// Buffered events per subscriber before it starts lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub output: OutputSpec,
}

fn default_concurrency() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_queue_size() -> usize {
    10_000
}

fn default_resolve_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_throughput_window() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            max_queue_size: default_max_queue_size(),
            resolve_attempts: default_resolve_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            throughput_window_secs: default_throughput_window(),
            event_capacity: default_event_capacity(),
            output: OutputSpec::default(),
        }
    }
}

impl QueueConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_resolve_attempts(mut self, attempts: u32) -> Self {
        self.resolve_attempts = attempts;
        self
    }

    /// Set the base backoff; the ceiling is raised to at least the base
    pub fn with_backoff_ms(mut self, base_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = self.backoff_max_ms.max(base_ms);
        self
    }

    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.output = output;
        self
    }

    /// Delay before retry number `attempt` (1-based), capped at `backoff_max_ms`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms);
        Duration::from_millis(millis)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_secs(self.throughput_window_secs.max(1))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(QueueError::invalid_input("concurrency must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(QueueError::invalid_input("max_attempts must be at least 1"));
        }
        if self.max_queue_size == 0 {
            return Err(QueueError::invalid_input("max_queue_size must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::invalid_input("event_capacity must be at least 1"));
        }
        if self.output.audio_quality > 9 {
            return Err(QueueError::invalid_input(format!(
                "audio quality must be between 0 and 9, got {}",
                self.output.audio_quality
            )));
        }
        Ok(())
    }

    /// Load configuration overrides from environment variables
    ///
    /// Supported environment variables:
    /// - YTMDL_CONCURRENCY: number (default: 3)
    /// - YTMDL_MAX_ATTEMPTS: number (default: 3)
    /// - YTMDL_MAX_QUEUE: number (default: 10000)
    /// - YTMDL_BACKOFF_MS: milliseconds (default: 500)
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Apply environment overrides on top of an existing configuration
    pub fn apply_env(mut self) -> Self {
        if let Ok(value) = std::env::var("YTMDL_CONCURRENCY") {
            match value.parse() {
                Ok(concurrency) => self.concurrency = concurrency,
                Err(_) => tracing::warn!("ignoring invalid YTMDL_CONCURRENCY: {}", value),
            }
        }

        if let Ok(value) = std::env::var("YTMDL_MAX_ATTEMPTS") {
            match value.parse() {
                Ok(attempts) => self.max_attempts = attempts,
                Err(_) => tracing::warn!("ignoring invalid YTMDL_MAX_ATTEMPTS: {}", value),
            }
        }

        if let Ok(value) = std::env::var("YTMDL_MAX_QUEUE") {
            match value.parse() {
                Ok(size) => self.max_queue_size = size,
                Err(_) => tracing::warn!("ignoring invalid YTMDL_MAX_QUEUE: {}", value),
            }
        }

        if let Ok(value) = std::env::var("YTMDL_BACKOFF_MS") {
            match value.parse() {
                Ok(base) => self = self.with_backoff_ms(base),
                Err(_) => tracing::warn!("ignoring invalid YTMDL_BACKOFF_MS: {}", value),
            }
        }

        self
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize configuration to JSON string
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
