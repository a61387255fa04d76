//! yt-dlp invocation settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How to run yt-dlp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YtDlpConfig {
    /// Executable name or path
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Fail a fetch when yt-dlp prints nothing for this long (not counted while paused)
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,

    /// Passed through verbatim before the source URL
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_binary() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_stall_timeout() -> u64 {
    300
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            stall_timeout_secs: default_stall_timeout(),
            extra_args: Vec::new(),
        }
    }
}

impl YtDlpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_stall_timeout(mut self, secs: u64) -> Self {
        self.stall_timeout_secs = secs;
        self
    }

    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs.max(1))
    }

    /// Load overrides from environment variables
    ///
    /// Supported environment variables:
    /// - YTMDL_YTDLP: path to the yt-dlp executable
    /// - YTMDL_STALL_TIMEOUT: seconds (default: 300)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(binary) = std::env::var("YTMDL_YTDLP") {
            if !binary.trim().is_empty() {
                config.binary = PathBuf::from(binary);
            }
        }

        if let Ok(value) = std::env::var("YTMDL_STALL_TIMEOUT") {
            match value.parse() {
                Ok(secs) => config.stall_timeout_secs = secs,
                Err(_) => tracing::warn!("ignoring invalid YTMDL_STALL_TIMEOUT: {}", value),
            }
        }

        config
    }
}
