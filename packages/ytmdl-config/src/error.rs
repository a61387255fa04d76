use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Unknown theme '{0}'")]
    UnknownTheme(String),

    #[error("Unsupported audio format '{0}'")]
    InvalidFormat(String),

    #[error("Audio quality must be between 0 and 9, got '{0}'")]
    InvalidQuality(String),

    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Home directory could not be determined")]
    NoHomeDir,
}

impl SettingsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }

    /// Whether the stored values themselves are wrong, as opposed to the file
    pub fn is_invalid_value(&self) -> bool {
        matches!(
            self,
            Self::UnknownTheme(_)
                | Self::InvalidFormat(_)
                | Self::InvalidQuality(_)
                | Self::InvalidConcurrency
        )
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;
